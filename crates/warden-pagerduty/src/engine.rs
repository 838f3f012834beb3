//! Shared orchestration state: remote client, identity map, persisted state,
//! and chat collaborators. Flow-specific behavior lives in sibling modules as
//! further `impl Engine` blocks.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Announcer, GroupDirectory};
use crate::error::{OpsError, RemoteError};
use crate::identity_map::IdentityMap;
use crate::incident_ops::list_incidents;
use crate::maintenance::MaintenanceWarningOutcome;
use crate::models::{IncidentStatus, OnCallEntry};
use crate::oncall_sync::OncallSyncOutcome;
use crate::remote_client::{Credential, RemoteClient};
use crate::scheduler::{spawn_periodic, PeriodicSchedule, SingleFlight};
use crate::state_store::{EngineStateStore, PersistedState};

pub const DEFAULT_ONCALL_SYNC_SCHEDULE: PeriodicSchedule = PeriodicSchedule::from_secs(30, 150);
pub const DEFAULT_MAINTENANCE_WARNING_SCHEDULE: PeriodicSchedule =
    PeriodicSchedule::from_secs(45, 600);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Deployment-specific settings for the engine.
pub struct EngineConfig {
    pub service_id: String,
    pub escalation_policy_id: String,
    /// External chat group mirroring the level-1 on-call set.
    pub oncall_group_id: String,
    pub oncall_sync: PeriodicSchedule,
    pub maintenance_warning: PeriodicSchedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A chat user acting with their own PagerDuty token.
pub struct Actor {
    pub username: String,
    pub token: String,
    pub remote_id: Option<String>,
}

impl Actor {
    pub fn credential(&self) -> Credential<'_> {
        Credential::User(&self.token)
    }
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) client: RemoteClient,
    pub(crate) identity: IdentityMap,
    state: Mutex<EngineStateStore>,
    pub(crate) announcer: Arc<dyn Announcer>,
    pub(crate) groups: Arc<dyn GroupDirectory>,
    oncall_sync_flight: Arc<SingleFlight>,
    maintenance_warning_flight: Arc<SingleFlight>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        client: RemoteClient,
        identity: IdentityMap,
        state: EngineStateStore,
        announcer: Arc<dyn Announcer>,
        groups: Arc<dyn GroupDirectory>,
    ) -> Self {
        Self {
            config,
            client,
            identity,
            state: Mutex::new(state),
            announcer,
            groups,
            oncall_sync_flight: SingleFlight::new(),
            maintenance_warning_flight: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn persisted_state(&self) -> Result<PersistedState, OpsError> {
        Ok(self.lock_state()?.state().clone())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EngineStateStore>, OpsError> {
        self.state
            .lock()
            .map_err(|_| OpsError::Local(anyhow!("engine state mutex is poisoned")))
    }

    /// Applies `update` and saves when it reports a change. The guard is
    /// released before returning, so callers never hold it across `.await`.
    pub(crate) fn update_state<F>(&self, update: F) -> Result<bool, OpsError>
    where
        F: FnOnce(&mut EngineStateStore) -> bool,
    {
        let mut store = self.lock_state()?;
        let changed = update(&mut store);
        if changed {
            store.save()?;
        }
        Ok(changed)
    }

    /// Token-holding chat user, if `username` has registered one.
    pub fn actor_for(&self, username: &str) -> Result<Option<Actor>, OpsError> {
        let Some(token) = self.identity.token_for(username)? else {
            return Ok(None);
        };
        Ok(Some(Actor {
            username: username.to_string(),
            token,
            remote_id: self.identity.remote_id_for(username)?,
        }))
    }

    /// Level-1 on-call entries under the configured escalation policy.
    pub async fn relevant_oncalls(&self) -> Result<Vec<OnCallEntry>, RemoteError> {
        let entries = self.client.oncalls(&self.config.escalation_policy_id).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.is_relevant(&self.config.escalation_policy_id))
            .collect())
    }

    pub async fn is_on_call(&self, remote_id: &str) -> Result<bool, RemoteError> {
        Ok(self
            .relevant_oncalls()
            .await?
            .iter()
            .any(|entry| entry.user.id == remote_id))
    }

    /// Chat rendering for a PagerDuty user: a mention when mapped, the raw
    /// id otherwise.
    pub(crate) fn remote_user_label(&self, remote_id: &str) -> Result<String, OpsError> {
        Ok(match self.identity.username_for(remote_id)? {
            Some(username) => self.announcer.mention(&username),
            None => remote_id.to_string(),
        })
    }

    /// `There are N active incidents.`-style summary of triggered and
    /// acknowledged incidents.
    pub(crate) async fn active_incident_summary(&self) -> Result<String, RemoteError> {
        let incidents = list_incidents(
            &self.client,
            &self.config.service_id,
            &[IncidentStatus::Triggered, IncidentStatus::Acknowledged],
        )
        .await?;
        let triggered = incidents
            .iter()
            .filter(|incident| incident.status == IncidentStatus::Triggered)
            .count();
        Ok(match incidents.len() {
            0 => "There are no active incidents.".to_string(),
            total => format!(
                "There are {total} active incidents ({triggered} unacknowledged)."
            ),
        })
    }

    /// Starts the on-call sync and long-maintenance warning timers.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let sync_engine = Arc::clone(self);
        let oncall_sync = spawn_periodic(
            "oncall-sync",
            self.config.oncall_sync,
            Arc::clone(&self.oncall_sync_flight),
            move || {
                let engine = Arc::clone(&sync_engine);
                async move { engine.run_oncall_sync_logged().await }
            },
        );

        let warning_engine = Arc::clone(self);
        let maintenance_warning = spawn_periodic(
            "maintenance-warning",
            self.config.maintenance_warning,
            Arc::clone(&self.maintenance_warning_flight),
            move || {
                let engine = Arc::clone(&warning_engine);
                async move { engine.run_maintenance_warning_logged().await }
            },
        );
        vec![oncall_sync, maintenance_warning]
    }

    /// One sync cycle with its result consumed by logging.
    pub async fn run_oncall_sync_logged(&self) {
        match self.run_oncall_sync().await {
            Ok(OncallSyncOutcome::Unchanged) => debug!("on-call set unchanged"),
            Ok(OncallSyncOutcome::NoUsableIdentifiers) => {
                warn!("on-call sync found no usable identifiers; group left untouched")
            }
            Ok(OncallSyncOutcome::Updated { previous, current }) => info!(
                previous = ?previous,
                current = ?current,
                "on-call group updated"
            ),
            Err(error) if error.is_failure() => error!(error = %error, "on-call sync failed"),
            Err(error) => warn!(error = %error, "on-call sync rejected"),
        }
    }

    /// One warning check with its result consumed by logging.
    pub async fn run_maintenance_warning_logged(&self) {
        match self.run_maintenance_warning().await {
            Ok(MaintenanceWarningOutcome::Announced { elapsed_minutes }) => {
                info!(elapsed_minutes, "announced long-running maintenance")
            }
            Ok(outcome) => debug!(outcome = ?outcome, "maintenance warning skipped"),
            Err(error) => error!(error = %error, "maintenance warning check failed"),
        }
    }
}
