//! PagerDuty REST v2 payload shapes consumed by the orchestration flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// `{id, summary}` reference object used throughout the API.
pub struct Reference {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Reference {
    pub fn label(&self) -> &str {
        self.summary
            .as_deref()
            .filter(|summary| !summary.trim().is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub acknowledger: Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub incident_number: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledgements: Vec<Acknowledgement>,
}

impl Incident {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or("(untitled)")
    }

    pub fn is_acknowledged_by(&self, remote_user_id: &str) -> bool {
        self.acknowledgements
            .iter()
            .any(|ack| ack.acknowledger.id == remote_user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: String,
    #[serde(rename = "type", default)]
    pub window_type: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub services: Vec<Reference>,
    #[serde(default)]
    pub created_by: Option<Reference>,
}

impl MaintenanceWindow {
    pub fn covers_service(&self, service_id: &str) -> bool {
        self.services.iter().any(|service| service.id == service_id)
    }

    pub fn is_ongoing(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnCallEntry {
    pub user: Reference,
    pub escalation_level: u32,
    pub escalation_policy: Reference,
    #[serde(default)]
    pub schedule: Option<Reference>,
}

impl OnCallEntry {
    /// Level-1 entries under the configured escalation policy.
    pub fn is_relevant(&self, escalation_policy_id: &str) -> bool {
        self.escalation_level == 1 && self.escalation_policy.id == escalation_policy_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncidentPage {
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn incident_decodes_acknowledgers_and_offsets() {
        let incident: Incident = serde_json::from_value(json!({
            "id": "PINC1",
            "incident_number": 42,
            "title": "Disk full",
            "status": "acknowledged",
            "created_at": "2024-05-01T10:00:00-04:00",
            "acknowledgements": [{"acknowledger": {"id": "PUSER1", "summary": "Ada"}}]
        }))
        .expect("decode incident");
        assert_eq!(incident.status, IncidentStatus::Acknowledged);
        assert!(incident.is_acknowledged_by("PUSER1"));
        assert!(!incident.is_acknowledged_by("PUSER2"));
        assert_eq!(incident.created_at.to_rfc3339(), "2024-05-01T14:00:00+00:00");
    }

    #[test]
    fn oncall_relevance_requires_level_one_and_matching_policy() {
        let entry: OnCallEntry = serde_json::from_value(json!({
            "user": {"id": "PUSER1"},
            "escalation_level": 1,
            "escalation_policy": {"id": "PPOL"},
            "schedule": null
        }))
        .expect("decode oncall");
        assert!(entry.is_relevant("PPOL"));
        assert!(!entry.is_relevant("OTHER"));
        let second_level = OnCallEntry {
            escalation_level: 2,
            ..entry
        };
        assert!(!second_level.is_relevant("PPOL"));
    }
}
