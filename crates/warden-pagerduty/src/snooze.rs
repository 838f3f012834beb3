use serde_json::Value;
use warden_core::{humanize_duration, parse_duration_text};

use crate::engine::{Actor, Engine};
use crate::error::OpsError;

/// Reply text for a snooze response: the snoozed incident's title, or a
/// message the API chose to return instead.
pub fn render_snooze_reply(incident_number: u64, duration_text: &str, response: &Value) -> String {
    if let Some(title) = response
        .pointer("/incident/title")
        .and_then(Value::as_str)
        .filter(|title| !title.trim().is_empty())
    {
        return format!("Snoozed #{incident_number} for {duration_text}: {title}");
    }
    if let Some(message) = response
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
    {
        return message.to_string();
    }
    format!("Snoozed #{incident_number} for {duration_text}.")
}

impl Engine {
    /// Snoozes the active incident with display number `incident_number`.
    pub async fn snooze(
        &self,
        actor: &Actor,
        incident_number: u64,
        duration_text: &str,
    ) -> Result<String, OpsError> {
        let duration = parse_duration_text(duration_text)
            .ok()
            .filter(|duration| duration.as_secs() > 0)
            .ok_or_else(|| {
                OpsError::Validation(format!(
                    "I couldn't understand `{}` as a duration.",
                    duration_text.trim()
                ))
            })?;

        // display numbers aren't remote ids; scan the active list
        let incidents = self.active_incidents().await?;
        let Some(incident) = incidents
            .iter()
            .find(|incident| incident.incident_number == incident_number)
        else {
            return Err(OpsError::Validation(format!(
                "There is no active incident #{incident_number}."
            )));
        };

        let response = self
            .client
            .snooze_incident(actor.credential(), &incident.id, duration.as_secs())
            .await?;
        Ok(render_snooze_reply(
            incident_number,
            &humanize_duration(duration),
            &response,
        ))
    }
}
