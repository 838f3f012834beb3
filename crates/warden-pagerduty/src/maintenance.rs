//! Maintenance windows for the configured service: query, start, end, and
//! the long-running maintenance announcement.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use tracing::{error, info};
use warden_core::{render_time_ago, unix_to_datetime};

use crate::engine::{Actor, Engine};
use crate::error::{OpsError, RemoteError};
use crate::models::MaintenanceWindow;

const MAINTENANCE_WINDOW_LENGTH_MINUTES: i64 = 60;
/// Pushes the end time past `now` so clock drift can't yield "end before now".
const MAINTENANCE_END_SKEW_SECONDS: i64 = 5;
const MAINTENANCE_WARNING_MIN_GAP_MINUTES: i64 = 25;
const MAINTENANCE_WARNING_THRESHOLD_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceWarningOutcome {
    WarnedRecently,
    NoMaintenance,
    TooShort,
    Announced { elapsed_minutes: i64 },
}

pub fn describe_window(window: &MaintenanceWindow, now: DateTime<Utc>) -> String {
    let services = if window.services.is_empty() {
        "(no services)".to_string()
    } else {
        window
            .services
            .iter()
            .map(|service| service.label().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let creator = window
        .created_by
        .as_ref()
        .map(|creator| creator.label().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{services} ({}, started by {creator})",
        render_time_ago(now - window.start_time)
    )
}

pub fn describe_windows(windows: &[MaintenanceWindow], now: DateTime<Utc>) -> String {
    windows
        .iter()
        .map(|window| describe_window(window, now))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Engine {
    /// Ongoing windows that cover the configured service.
    pub async fn relevant_maintenance_windows(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceWindow>, RemoteError> {
        let windows = self.client.ongoing_maintenance_windows().await?;
        Ok(windows
            .into_iter()
            .filter(|window| {
                window.covers_service(&self.config.service_id) && window.is_ongoing(now)
            })
            .collect())
    }

    pub async fn maintenance_status(&self) -> Result<String, OpsError> {
        let now = Utc::now();
        let windows = self.relevant_maintenance_windows(now).await?;
        if windows.is_empty() {
            return Ok("No maintenance is in progress.".to_string());
        }
        Ok(format!(
            "Maintenance in progress: {}",
            describe_windows(&windows, now)
        ))
    }

    /// Opens a one-hour window and acks triggered incidents. Never opens a
    /// second window while one is ongoing.
    pub async fn start_maintenance(&self, actor: &Actor, force: bool) -> Result<String, OpsError> {
        if !force {
            let on_call = match actor.remote_id.as_deref() {
                Some(remote_id) => self.is_on_call(remote_id).await?,
                None => false,
            };
            if !on_call {
                return Err(OpsError::Guard(
                    "You're not on call right now. Use `maint start /force` if you really mean it."
                        .to_string(),
                ));
            }
        }

        // re-check after the on-call lookup; another flow may have opened one
        let now = Utc::now();
        let existing = self.relevant_maintenance_windows(now).await?;
        if !existing.is_empty() {
            return Err(OpsError::Guard(format!(
                "Maintenance is already in progress: {}",
                describe_windows(&existing, now)
            )));
        }

        let start = Utc::now();
        let end = start + ChronoDuration::minutes(MAINTENANCE_WINDOW_LENGTH_MINUTES);
        let window = self
            .client
            .create_maintenance_window(actor.credential(), &self.config.service_id, start, end)
            .await?;
        info!(window_id = %window.id, actor = %actor.username, "maintenance window opened");

        match self.acknowledge_all(actor).await {
            Ok(acked) => Ok(format!(
                "Maintenance started for the next hour. Acked {acked} incidents."
            )),
            Err(error) => {
                error!(error = %error, "acknowledging incidents after maintenance start failed");
                Ok(
                    "Maintenance started for the next hour, but acking open incidents failed."
                        .to_string(),
                )
            }
        }
    }

    /// Ends every relevant window; updates are issued concurrently.
    pub async fn end_maintenance(&self, actor: &Actor) -> Result<String, OpsError> {
        let windows = self.relevant_maintenance_windows(Utc::now()).await?;
        if windows.is_empty() {
            return Err(OpsError::Guard(
                "No maintenance is in progress.".to_string(),
            ));
        }

        let end = Utc::now() + ChronoDuration::seconds(MAINTENANCE_END_SKEW_SECONDS);
        let results = join_all(windows.iter().map(|window| {
            self.client
                .set_maintenance_window_end(actor.credential(), &window.id, end)
        }))
        .await;

        let mut failed = 0_usize;
        for (window, result) in windows.iter().zip(results) {
            if let Err(error) = result {
                failed += 1;
                error!(window_id = %window.id, error = %error, "ending maintenance window failed");
            }
        }
        if failed > 0 {
            return Err(OpsError::Incomplete {
                message: format!(
                    "Something went wrong ending {failed} of {} maintenance windows. Please end them manually in PagerDuty.",
                    windows.len()
                ),
                failed,
            });
        }
        info!(windows = windows.len(), actor = %actor.username, "maintenance ended");
        Ok("Maintenance ended.".to_string())
    }

    pub async fn run_maintenance_warning(&self) -> Result<MaintenanceWarningOutcome, OpsError> {
        self.run_maintenance_warning_at(Utc::now()).await
    }

    /// Announces maintenance that has run past the threshold, at most once
    /// per gap.
    pub async fn run_maintenance_warning_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<MaintenanceWarningOutcome, OpsError> {
        let last_warning =
            unix_to_datetime(self.persisted_state()?.last_maintenance_warning_time);
        if now - last_warning < ChronoDuration::minutes(MAINTENANCE_WARNING_MIN_GAP_MINUTES) {
            return Ok(MaintenanceWarningOutcome::WarnedRecently);
        }

        let windows = self.relevant_maintenance_windows(now).await?;
        let Some(oldest_start) = windows.iter().map(|window| window.start_time).min() else {
            return Ok(MaintenanceWarningOutcome::NoMaintenance);
        };
        let elapsed = now - oldest_start;
        if elapsed <= ChronoDuration::minutes(MAINTENANCE_WARNING_THRESHOLD_MINUTES) {
            return Ok(MaintenanceWarningOutcome::TooShort);
        }

        let warned_at = u64::try_from(now.timestamp()).unwrap_or_default();
        self.update_state(|store| store.set_last_maintenance_warning_time(warned_at))?;
        self.announcer
            .announce(&format!(
                "Heads up: maintenance has been running for a while. {}",
                describe_windows(&windows, now)
            ))
            .await?;
        Ok(MaintenanceWarningOutcome::Announced {
            elapsed_minutes: elapsed.num_minutes(),
        })
    }
}
