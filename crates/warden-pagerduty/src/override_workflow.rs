//! Temporary on-call reassignment through schedule overrides.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::info;
use warden_core::{humanize_duration, parse_duration_text};

use crate::engine::{Actor, Engine};
use crate::error::{OpsError, RemoteError};

pub const OVERRIDE_MAX_DURATION: Duration = Duration::from_secs(8 * 60 * 60);
pub const OVERRIDE_MIN_DURATION: Duration = Duration::from_secs(60);
const OVERRIDE_START_DELAY_SECONDS: i64 = 15;

/// Parses and bounds-checks an override length.
pub fn parse_override_duration(text: &str) -> Result<Duration, OpsError> {
    let duration = parse_duration_text(text).map_err(|_| {
        OpsError::Validation(format!(
            "I couldn't understand `{}` as a duration. Try something like `30m` or `2h`.",
            text.trim()
        ))
    })?;
    if duration > OVERRIDE_MAX_DURATION {
        return Err(OpsError::Validation(
            "That's too long; overrides can last at most 8 hours.".to_string(),
        ));
    }
    if duration < OVERRIDE_MIN_DURATION {
        return Err(OpsError::Validation(
            "That's less than a minute; you're probably missing a unit (e.g. `30m`).".to_string(),
        ));
    }
    Ok(duration)
}

/// True when the create-override response holds exactly one created record.
pub fn is_single_created_override(response: &Value) -> bool {
    match response {
        Value::Array(results) => {
            results.len() == 1
                && results[0]
                    .get("status")
                    .and_then(Value::as_u64)
                    .is_some_and(|status| (200..300).contains(&status))
                && results[0].get("override").is_some_and(Value::is_object)
        }
        Value::Object(object) => match object.get("overrides") {
            Some(Value::Array(overrides)) => overrides.len() == 1,
            _ => object.get("override").is_some_and(Value::is_object),
        },
        _ => false,
    }
}

impl Engine {
    /// Puts `target_name` on call for `duration_text`, attributed to
    /// `requester`.
    pub async fn give_oncall(
        &self,
        requester: &Actor,
        target_name: &str,
        duration_text: &str,
    ) -> Result<String, OpsError> {
        let Some(target) = self.identity.resolve_user(target_name)? else {
            return Err(OpsError::Validation(format!(
                "I don't know who `{}` is.",
                target_name.trim()
            )));
        };
        let Some(target_remote_id) = self.identity.remote_id_for(&target.username)? else {
            return Err(OpsError::Validation(format!(
                "{} is not a PagerDuty user I know about.",
                self.announcer.mention(&target.username)
            )));
        };
        let duration = parse_override_duration(duration_text)?;

        let entries = self.relevant_oncalls().await?;
        let mut on_call_users = entries
            .iter()
            .map(|entry| entry.user.id.as_str())
            .collect::<Vec<_>>();
        on_call_users.sort_unstable();
        on_call_users.dedup();
        if on_call_users.len() > 1 {
            return Err(OpsError::Guard(
                "More than one person is on call right now, so I can't tell whose shift to override."
                    .to_string(),
            ));
        }
        let Some(schedule) = entries.iter().find_map(|entry| entry.schedule.as_ref()) else {
            return Err(OpsError::Guard(
                "I couldn't find an on-call schedule to override.".to_string(),
            ));
        };

        let start = Utc::now() + ChronoDuration::seconds(OVERRIDE_START_DELAY_SECONDS);
        let end = start + ChronoDuration::seconds(duration.as_secs() as i64);
        let endpoint = format!("POST /schedules/{}/overrides", schedule.id);
        let response = self
            .client
            .create_override(
                requester.credential(),
                &schedule.id,
                start,
                end,
                &target_remote_id,
            )
            .await?;
        if !is_single_created_override(&response) {
            return Err(OpsError::Remote(RemoteError::UnexpectedShape { endpoint }));
        }

        info!(
            schedule_id = %schedule.id,
            target = %target.username,
            requester = %requester.username,
            seconds = duration.as_secs(),
            "on-call override created"
        );
        Ok(format!(
            "{} is now on call for {}.",
            self.announcer.mention(&target.username),
            humanize_duration(duration)
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn override_bounds_reject_too_short_and_too_long() {
        assert!(matches!(
            parse_override_duration("59s"),
            Err(OpsError::Validation(message)) if message.contains("missing a unit")
        ));
        assert!(matches!(
            parse_override_duration("8h1m"),
            Err(OpsError::Validation(message)) if message.contains("8 hours")
        ));
    }

    #[test]
    fn override_bounds_accept_inclusive_limits() {
        assert_eq!(
            parse_override_duration("30m").expect("30m"),
            Duration::from_secs(1_800)
        );
        assert_eq!(
            parse_override_duration("8h").expect("8h"),
            OVERRIDE_MAX_DURATION
        );
        assert_eq!(
            parse_override_duration("1m").expect("1m"),
            OVERRIDE_MIN_DURATION
        );
    }

    #[test]
    fn unparseable_duration_is_a_validation_failure() {
        assert!(matches!(
            parse_override_duration("a while"),
            Err(OpsError::Validation(_))
        ));
    }

    #[test]
    fn created_override_shapes() {
        assert!(is_single_created_override(&json!([
            {"status": 201, "override": {"id": "PO1"}}
        ])));
        assert!(!is_single_created_override(&json!([
            {"status": 400, "errors": ["Override must end after its start"]}
        ])));
        assert!(!is_single_created_override(&json!([
            {"status": 201, "override": {"id": "PO1"}},
            {"status": 201, "override": {"id": "PO2"}}
        ])));
        assert!(is_single_created_override(&json!({"override": {"id": "PO1"}})));
        assert!(!is_single_created_override(&json!({"overrides": []})));
    }
}
