use anyhow::{Context, Result};
use async_trait::async_trait;
use warden_pagerduty::{Announcer, GroupDirectory};

use crate::slack_api_client::SlackApiClient;

/// Slack-backed announcement channel and on-call usergroup.
#[derive(Clone)]
pub struct SlackWorkspace {
    client: SlackApiClient,
    announce_channel: String,
}

impl SlackWorkspace {
    pub fn new(client: SlackApiClient, announce_channel: &str) -> Self {
        Self {
            client,
            announce_channel: announce_channel.trim().to_string(),
        }
    }
}

#[async_trait]
impl Announcer for SlackWorkspace {
    async fn announce(&self, text: &str) -> Result<()> {
        self.client
            .post_message(&self.announce_channel, text, None)
            .await
            .with_context(|| format!("failed to announce in {}", self.announce_channel))?;
        Ok(())
    }

    fn mention(&self, username: &str) -> String {
        format!("<@{username}>")
    }
}

#[async_trait]
impl GroupDirectory for SlackWorkspace {
    async fn set_members(&self, group_id: &str, usernames: &[String]) -> Result<()> {
        self.client.update_usergroup_members(group_id, usernames).await
    }
}
