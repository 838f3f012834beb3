//! Local stdin transport: one `user: command` per line, replies on stdout.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use warden_pagerduty::{Announcer, Engine, GroupDirectory};

pub(crate) struct StdoutAnnouncer;

#[async_trait]
impl Announcer for StdoutAnnouncer {
    async fn announce(&self, text: &str) -> Result<()> {
        println!("[announce] {text}");
        Ok(())
    }

    fn mention(&self, username: &str) -> String {
        format!("@{username}")
    }
}

/// Stand-in for a chat group when none is reachable; every write fails so
/// the on-call cache never records a change that did not happen.
pub(crate) struct UnavailableGroupDirectory;

#[async_trait]
impl GroupDirectory for UnavailableGroupDirectory {
    async fn set_members(&self, group_id: &str, _usernames: &[String]) -> Result<()> {
        bail!("group {group_id} is not reachable from the console transport")
    }
}

/// Splits `user: text`; lines without a user prefix belong to `default_user`.
pub(crate) fn parse_console_line(line: &str, default_user: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some((user, text)) = trimmed.split_once(':') {
        let user = user.trim();
        if !user.is_empty() && !user.contains(char::is_whitespace) {
            return Some((user.to_string(), text.trim().to_string()));
        }
    }
    Some((default_user.to_string(), trimmed.to_string()))
}

pub(crate) async fn run_console(engine: Arc<Engine>, default_user: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read console input")?
    {
        let Some((user, text)) = parse_console_line(&line, default_user) else {
            continue;
        };
        if let Some(reply) = engine.handle_message(&user, &text).await {
            println!("{reply}");
        }
    }
    Ok(())
}
