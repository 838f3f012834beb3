//! Mirrors the level-1 on-call set into an external chat group.
//!
//! The cached `on_call_list` only moves after the group write is confirmed,
//! so a failed write is retried on the next cycle.

use std::collections::BTreeSet;

use anyhow::Context;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::OpsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OncallSyncOutcome {
    Unchanged,
    NoUsableIdentifiers,
    Updated {
        previous: Vec<String>,
        current: Vec<String>,
    },
}

/// Sorted, de-duplicated remote user ids.
pub fn normalize_oncall_ids<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    ids.into_iter()
        .filter(|id| !id.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Lines announcing who left, who joined, and who is on call now.
pub fn render_oncall_change(previous: &[String], current: &[String]) -> Vec<String> {
    let mut lines = previous
        .iter()
        .filter(|name| !current.contains(name))
        .map(|name| format!("{name} has been removed"))
        .collect::<Vec<_>>();
    lines.extend(
        current
            .iter()
            .filter(|name| !previous.contains(name))
            .map(|name| format!("{name} has been added")),
    );
    lines.push(format!("Now oncall: {}", current.join(", ")));
    lines
}

impl Engine {
    pub async fn run_oncall_sync(&self) -> Result<OncallSyncOutcome, OpsError> {
        let entries = self.relevant_oncalls().await?;
        let current = normalize_oncall_ids(entries.into_iter().map(|entry| entry.user.id));

        let previous = self.persisted_state()?.on_call_list;
        if previous == current {
            debug!(oncall = ?current, "on-call set matches cache");
            return Ok(OncallSyncOutcome::Unchanged);
        }

        let snapshot = self.identity.snapshot()?;
        let usernames = current
            .iter()
            .map(|remote_id| {
                snapshot
                    .username_for(remote_id)
                    .unwrap_or(remote_id.as_str())
                    .to_string()
            })
            .filter(|name| !name.trim().is_empty())
            .collect::<Vec<_>>();
        if usernames.is_empty() {
            return Ok(OncallSyncOutcome::NoUsableIdentifiers);
        }

        self.groups
            .set_members(&self.config.oncall_group_id, &usernames)
            .await
            .with_context(|| {
                format!(
                    "failed to update on-call group {}",
                    self.config.oncall_group_id
                )
            })?;

        // confirmed: commit before anything else can fail
        self.update_state(|store| store.replace_on_call_list(current.clone()))?;

        let previous_labels = previous
            .iter()
            .map(|remote_id| self.remote_user_label(remote_id))
            .collect::<Result<Vec<_>, _>>()?;
        let current_labels = current
            .iter()
            .map(|remote_id| self.remote_user_label(remote_id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = render_oncall_change(&previous_labels, &current_labels);
        match self.active_incident_summary().await {
            Ok(summary) => lines.push(summary),
            Err(error) => warn!(error = %error, "could not summarize active incidents"),
        }
        self.announcer.announce(&lines.join("\n")).await?;

        Ok(OncallSyncOutcome::Updated { previous, current })
    }

    pub async fn oncall_command(&self) -> Result<String, OpsError> {
        let entries = self.relevant_oncalls().await?;
        let ids = normalize_oncall_ids(entries.iter().map(|entry| entry.user.id.clone()));
        if ids.is_empty() {
            return Ok("Nobody is on call right now.".to_string());
        }
        let labels = ids
            .iter()
            .map(|remote_id| self.remote_user_label(remote_id))
            .collect::<Result<Vec<_>, _>>()?;
        let schedules = entries
            .iter()
            .filter_map(|entry| entry.schedule.as_ref())
            .map(|schedule| schedule.label().to_string())
            .collect::<BTreeSet<_>>();
        let mut reply = format!("Now oncall: {}", labels.join(", "));
        if !schedules.is_empty() {
            reply.push_str(&format!(
                " (schedule: {})",
                schedules.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn change_lines_report_departures_arrivals_and_current_set() {
        let lines = render_oncall_change(&names(&["A", "B"]), &names(&["B", "C"]));
        assert_eq!(
            lines,
            vec![
                "A has been removed".to_string(),
                "C has been added".to_string(),
                "Now oncall: B, C".to_string(),
            ]
        );
    }

    #[test]
    fn normalize_sorts_and_dedupes() {
        let ids = normalize_oncall_ids(names(&["P3", "P1", "P3", " ", "P2"]));
        assert_eq!(ids, names(&["P1", "P2", "P3"]));
    }
}
