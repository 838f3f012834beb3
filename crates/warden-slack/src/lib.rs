//! Slack transport for the warden PagerDuty engine.
//!
//! Provides the Web API client, a [`SlackWorkspace`] implementing the
//! engine's announcement and group collaborators, and the Socket Mode
//! bridge that turns mentions and direct messages into engine commands.

mod slack_api_client;
mod slack_bridge;
mod slack_retry;
mod workspace;

pub use slack_api_client::{SlackApiClient, SlackPostedMessage};
pub use slack_bridge::{run_slack_bridge, SlackBridgeConfig};
pub use workspace::SlackWorkspace;
