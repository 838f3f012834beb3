//! Authenticated PagerDuty REST client. Every remote call in the crate goes
//! through [`RemoteClient::request`].

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RemoteError;
use crate::models::{
    Incident, IncidentPage, IncidentStatus, MaintenanceWindow, OnCallEntry, RemoteUser,
};

const PAGERDUTY_ACCEPT: &str = "application/vnd.pagerduty+json;version=2";

/// Which token authorizes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    /// The deployment's service-level API key.
    Service,
    /// A user's personal token, for writes attributed to that user.
    User(&'a str),
}

#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    api_base: String,
    service_key: String,
}

impl RemoteClient {
    pub fn new(api_base: &str, service_key: &str, request_timeout_ms: u64) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("warden-pagerduty"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(PAGERDUTY_ACCEPT),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create pagerduty api client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            service_key: service_key.trim().to_string(),
        })
    }

    /// Issues one request. Non-2xx statuses become [`RemoteError::Status`]
    /// carrying the raw body; the body is decoded only on success.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        credential: Credential<'_>,
    ) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
    {
        let endpoint = format!("{} {}", method, path);
        let token = match credential {
            Credential::Service => self.service_key.as_str(),
            Credential::User(token) => token.trim(),
        };
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .header(reqwest::header::AUTHORIZATION, format!("Token token={token}"));
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!(endpoint = %endpoint, user_credential = matches!(credential, Credential::User(_)), "pagerduty request");
        let response = builder
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| RemoteError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                endpoint,
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str::<T>(&text).map_err(|source| RemoteError::Decode { endpoint, source })
    }

    pub async fn ongoing_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, RemoteError> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            maintenance_windows: Vec<MaintenanceWindow>,
        }

        let envelope: Envelope = self
            .request(
                Method::GET,
                "/maintenance_windows",
                &[("filter", "ongoing".to_string())],
                None,
                Credential::Service,
            )
            .await?;
        Ok(envelope.maintenance_windows)
    }

    pub async fn create_maintenance_window(
        &self,
        credential: Credential<'_>,
        service_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MaintenanceWindow, RemoteError> {
        #[derive(Deserialize)]
        struct Envelope {
            maintenance_window: MaintenanceWindow,
        }

        let payload = json!({
            "maintenance_window": {
                "type": "maintenance_window",
                "start_time": format_timestamp(start),
                "end_time": format_timestamp(end),
                "services": [{"id": service_id, "type": "service_reference"}],
            }
        });
        let envelope: Envelope = self
            .request(
                Method::POST,
                "/maintenance_windows",
                &[],
                Some(&payload),
                credential,
            )
            .await?;
        Ok(envelope.maintenance_window)
    }

    pub async fn set_maintenance_window_end(
        &self,
        credential: Credential<'_>,
        window_id: &str,
        end: DateTime<Utc>,
    ) -> Result<Value, RemoteError> {
        let payload = json!({
            "maintenance_window": {
                "type": "maintenance_window",
                "end_time": format_timestamp(end),
            }
        });
        self.request(
            Method::PUT,
            &format!("/maintenance_windows/{window_id}"),
            &[],
            Some(&payload),
            credential,
        )
        .await
    }

    pub async fn oncalls(&self, escalation_policy_id: &str) -> Result<Vec<OnCallEntry>, RemoteError> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            oncalls: Vec<OnCallEntry>,
        }

        let envelope: Envelope = self
            .request(
                Method::GET,
                "/oncalls",
                &[("escalation_policy_ids[]", escalation_policy_id.to_string())],
                None,
                Credential::Service,
            )
            .await?;
        Ok(envelope.oncalls)
    }

    pub async fn incidents_page(
        &self,
        service_id: &str,
        statuses: &[IncidentStatus],
        limit: usize,
        offset: usize,
    ) -> Result<IncidentPage, RemoteError> {
        let mut query = vec![("service_ids[]", service_id.to_string())];
        query.extend(
            statuses
                .iter()
                .map(|status| ("statuses[]", status.as_str().to_string())),
        );
        query.push(("limit", limit.to_string()));
        query.push(("offset", offset.to_string()));
        self.request(Method::GET, "/incidents", &query, None, Credential::Service)
            .await
    }

    pub async fn update_incident_statuses(
        &self,
        credential: Credential<'_>,
        incident_ids: &[String],
        status: IncidentStatus,
    ) -> Result<Vec<Incident>, RemoteError> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            incidents: Vec<Incident>,
        }

        let incidents = incident_ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "type": "incident_reference",
                    "status": status.as_str(),
                })
            })
            .collect::<Vec<_>>();
        let payload = json!({ "incidents": incidents });
        let envelope: Envelope = self
            .request(Method::PUT, "/incidents", &[], Some(&payload), credential)
            .await?;
        Ok(envelope.incidents)
    }

    pub async fn create_override(
        &self,
        credential: Credential<'_>,
        schedule_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        remote_user_id: &str,
    ) -> Result<Value, RemoteError> {
        let payload = json!({
            "overrides": [{
                "start": format_timestamp(start),
                "end": format_timestamp(end),
                "user": {"type": "user_reference", "id": remote_user_id},
            }]
        });
        self.request(
            Method::POST,
            &format!("/schedules/{schedule_id}/overrides"),
            &[],
            Some(&payload),
            credential,
        )
        .await
    }

    pub async fn snooze_incident(
        &self,
        credential: Credential<'_>,
        incident_id: &str,
        duration_seconds: u64,
    ) -> Result<Value, RemoteError> {
        let payload = json!({ "duration": duration_seconds });
        self.request(
            Method::POST,
            &format!("/incidents/{incident_id}/snooze"),
            &[],
            Some(&payload),
            credential,
        )
        .await
    }

    /// Validates a personal token and returns the user it belongs to.
    pub async fn current_user(&self, token: &str) -> Result<RemoteUser, RemoteError> {
        #[derive(Deserialize)]
        struct Envelope {
            user: RemoteUser,
        }

        let envelope: Envelope = self
            .request(Method::GET, "/users/me", &[], None, Credential::User(token))
            .await?;
        Ok(envelope.user)
    }
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    #[tokio::test]
    async fn integration_request_sends_version_header_and_user_token() {
        let server = MockServer::start();
        let me = server.mock(|when, then| {
            when.method(GET)
                .path("/users/me")
                .header("accept", PAGERDUTY_ACCEPT)
                .header("authorization", "Token token=user-token");
            then.status(200)
                .json_body(serde_json::json!({"user": {"id": "PUSER1", "email": "ada@example.com"}}));
        });
        let client = RemoteClient::new(&server.base_url(), "service-key", 2_000).expect("client");

        let user = client.current_user("user-token").await.expect("current user");
        assert_eq!(user.id, "PUSER1");
        me.assert();
    }

    #[tokio::test]
    async fn integration_non_success_status_carries_raw_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/oncalls");
            then.status(401).body("{\"error\":{\"message\":\"Unauthorized\"}}");
        });
        let client = RemoteClient::new(&server.base_url(), "bad-key", 2_000).expect("client");

        let error = client.oncalls("PPOL").await.expect_err("unauthorized");
        assert_eq!(error.status(), Some(401));
        assert_eq!(error.endpoint(), "GET /oncalls");
        match error {
            RemoteError::Status { body, .. } => assert!(body.contains("Unauthorized")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn regression_malformed_success_body_is_a_decode_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/maintenance_windows");
            then.status(200).body("not json");
        });
        let client = RemoteClient::new(&server.base_url(), "service-key", 2_000).expect("client");

        let error = client
            .ongoing_maintenance_windows()
            .await
            .expect_err("decode failure");
        assert!(matches!(error, RemoteError::Decode { .. }));
    }
}
