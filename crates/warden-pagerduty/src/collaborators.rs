//! Seams to the chat platform the engine publishes to.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
/// Publishes messages to the designated announcement channel.
pub trait Announcer: Send + Sync {
    async fn announce(&self, text: &str) -> Result<()>;

    /// Renders a chat username for inclusion in message text.
    fn mention(&self, username: &str) -> String {
        username.to_string()
    }
}

#[async_trait]
/// Owns the external group that mirrors who is on call.
pub trait GroupDirectory: Send + Sync {
    /// Replaces the group's membership. `Ok` means the write was confirmed.
    async fn set_members(&self, group_id: &str, usernames: &[String]) -> Result<()>;
}
