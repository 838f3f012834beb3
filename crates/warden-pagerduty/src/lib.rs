//! PagerDuty orchestration engine for chat-driven incident response.
//!
//! The [`Engine`] owns the remote client, the identity map between chat
//! users and PagerDuty users, and the small persisted state used by the
//! background timers. Chat transports feed it text through
//! [`Engine::handle_message`] and implement [`Announcer`] and
//! [`GroupDirectory`] for outbound traffic.

pub mod collaborators;
pub mod commands;
pub mod engine;
pub mod error;
pub mod identity_map;
pub mod incident_ops;
pub mod maintenance;
pub mod models;
pub mod oncall_sync;
pub mod override_workflow;
pub mod preferences;
pub mod remote_client;
pub mod scheduler;
pub mod snooze;
pub mod state_store;

pub use collaborators::{Announcer, GroupDirectory};
pub use commands::{command_usage, parse_command, Command};
pub use engine::{
    Actor, Engine, EngineConfig, DEFAULT_MAINTENANCE_WARNING_SCHEDULE,
    DEFAULT_ONCALL_SYNC_SCHEDULE,
};
pub use error::{OpsError, RemoteError, GENERIC_REMOTE_FAILURE};
pub use identity_map::{IdentityMap, IdentitySnapshot};
pub use incident_ops::{list_incidents, update_status, ResolveFilter};
pub use maintenance::MaintenanceWarningOutcome;
pub use models::{Incident, IncidentStatus, MaintenanceWindow, OnCallEntry, RemoteUser};
pub use oncall_sync::OncallSyncOutcome;
pub use preferences::{FilePreferenceStore, PreferenceStore, UserPreferences};
pub use remote_client::{Credential, RemoteClient};
pub use scheduler::{PeriodicSchedule, SingleFlight};
pub use state_store::{EngineStateStore, PersistedState};
