//! Paginated incident listing and chunked bulk status updates.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, warn};
use warden_core::render_time_ago;

use crate::engine::{Actor, Engine};
use crate::error::{OpsError, RemoteError};
use crate::models::{Incident, IncidentStatus};
use crate::remote_client::{Credential, RemoteClient};

pub const INCIDENT_PAGE_LIMIT: usize = 100;
/// Fail-safe against an API that keeps reporting `more: true`.
pub const INCIDENT_PAGE_CAP: usize = 20;
/// Remote per-request maximum for bulk incident updates.
pub const INCIDENT_UPDATE_CHUNK: usize = 500;

/// Lists incidents for `service_id` in `statuses`, one page at a time.
///
/// Stops when the API reports no further pages or after
/// [`INCIDENT_PAGE_CAP`] pages; in the latter case the result is truncated.
pub async fn list_incidents(
    client: &RemoteClient,
    service_id: &str,
    statuses: &[IncidentStatus],
) -> Result<Vec<Incident>, RemoteError> {
    let mut incidents = Vec::new();
    let mut offset = 0_usize;
    for page in 1..=INCIDENT_PAGE_CAP {
        let chunk = client
            .incidents_page(service_id, statuses, INCIDENT_PAGE_LIMIT, offset)
            .await?;
        let received = chunk.incidents.len();
        incidents.extend(chunk.incidents);
        if !chunk.more {
            debug!(pages = page, incidents = incidents.len(), "listed incidents");
            return Ok(incidents);
        }
        offset = offset.saturating_add(received.max(1));
    }
    warn!(
        pages = INCIDENT_PAGE_CAP,
        incidents = incidents.len(),
        "incident listing hit the page cap; results are truncated"
    );
    Ok(incidents)
}

/// Sets `status` on every id, at most [`INCIDENT_UPDATE_CHUNK`] ids per
/// request. Every chunk is attempted; failures are reported together and
/// chunks that succeeded are not reverted. Returned incidents are limited to
/// the requested ids.
pub async fn update_status(
    client: &RemoteClient,
    credential: Credential<'_>,
    status: IncidentStatus,
    incident_ids: &[String],
) -> Result<Vec<Incident>, OpsError> {
    if incident_ids.is_empty() {
        return Ok(Vec::new());
    }

    let results = join_all(
        incident_ids
            .chunks(INCIDENT_UPDATE_CHUNK)
            .map(|chunk| client.update_incident_statuses(credential, chunk, status)),
    )
    .await;

    let requested = incident_ids.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut updated = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(incidents) => updated.extend(
                incidents
                    .into_iter()
                    .filter(|incident| requested.contains(incident.id.as_str())),
            ),
            Err(error) => failures.push(error),
        }
    }
    debug!(
        chunks = incident_ids.len().div_ceil(INCIDENT_UPDATE_CHUNK),
        updated = updated.len(),
        status = status.as_str(),
        "bulk incident update finished"
    );
    let failed_chunks = failures.len();
    match failures.into_iter().next() {
        None => Ok(updated),
        Some(source) => Err(OpsError::PartialBatch {
            applied: updated.len(),
            failed_chunks,
            source,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveFilter {
    /// Every triggered or acknowledged incident.
    All,
    /// Only acknowledged incidents.
    Acked,
    /// Only incidents the requester acknowledged.
    Own,
}

impl ResolveFilter {
    pub fn default_only_acked(&self) -> bool {
        match self {
            Self::All => false,
            Self::Acked | Self::Own => true,
        }
    }
}

/// Ids of incidents a `resolve` request applies to.
///
/// `only_acked` of `None` takes the filter's default. With `only_acked`
/// false, `Own` also takes triggered incidents, which have no acknowledger.
pub fn select_resolvable(
    incidents: &[Incident],
    filter: ResolveFilter,
    only_acked: Option<bool>,
    requester_remote_id: Option<&str>,
) -> Vec<String> {
    let only_acked = match filter {
        ResolveFilter::Acked => true,
        _ => only_acked.unwrap_or_else(|| filter.default_only_acked()),
    };
    incidents
        .iter()
        .filter(|incident| match incident.status {
            IncidentStatus::Acknowledged => match filter {
                ResolveFilter::Own => requester_remote_id
                    .is_some_and(|remote_id| incident.is_acknowledged_by(remote_id)),
                ResolveFilter::All | ResolveFilter::Acked => true,
            },
            IncidentStatus::Triggered => !only_acked,
            IncidentStatus::Resolved => false,
        })
        .map(|incident| incident.id.clone())
        .collect()
}

pub fn render_incident_line(incident: &Incident, now: DateTime<Utc>) -> String {
    format!(
        "#{} [{}] {} (opened {})",
        incident.incident_number,
        incident.status.as_str(),
        incident.display_title(),
        render_time_ago(now - incident.created_at)
    )
}

impl Engine {
    pub(crate) async fn active_incidents(&self) -> Result<Vec<Incident>, RemoteError> {
        list_incidents(
            &self.client,
            &self.config.service_id,
            &[IncidentStatus::Triggered, IncidentStatus::Acknowledged],
        )
        .await
    }

    /// Acknowledges every triggered incident; returns how many were acked.
    pub async fn acknowledge_all(&self, actor: &Actor) -> Result<usize, OpsError> {
        let triggered = list_incidents(
            &self.client,
            &self.config.service_id,
            &[IncidentStatus::Triggered],
        )
        .await?;
        let ids = triggered
            .into_iter()
            .map(|incident| incident.id)
            .collect::<Vec<_>>();
        let updated = update_status(
            &self.client,
            actor.credential(),
            IncidentStatus::Acknowledged,
            &ids,
        )
        .await?;
        Ok(updated.len())
    }

    pub async fn ack_all_command(&self, actor: &Actor) -> Result<String, OpsError> {
        match self.acknowledge_all(actor).await? {
            0 => Err(OpsError::NoOp(
                "There are no triggered incidents to ack.".to_string(),
            )),
            count => Ok(format!("Successfully acked {count} incidents. Good luck!")),
        }
    }

    pub async fn resolve_command(
        &self,
        actor: &Actor,
        filter: ResolveFilter,
        only_acked: Option<bool>,
    ) -> Result<String, OpsError> {
        if filter == ResolveFilter::Own && actor.remote_id.is_none() {
            return Err(OpsError::Guard(
                "I don't know your PagerDuty user, so I can't tell which incidents are yours."
                    .to_string(),
            ));
        }
        let incidents = self.active_incidents().await?;
        let ids = select_resolvable(&incidents, filter, only_acked, actor.remote_id.as_deref());
        if ids.is_empty() {
            return Err(OpsError::NoOp("There is nothing to resolve.".to_string()));
        }
        let resolved = update_status(
            &self.client,
            actor.credential(),
            IncidentStatus::Resolved,
            &ids,
        )
        .await?;
        Ok(format!(
            "Successfully resolved {} incidents.",
            resolved.len()
        ))
    }

    pub async fn incidents_command(&self) -> Result<String, OpsError> {
        let incidents = self.active_incidents().await?;
        if incidents.is_empty() {
            return Ok("No open incidents.".to_string());
        }
        let now = Utc::now();
        let mut lines = vec![format!("{} open incidents:", incidents.len())];
        lines.extend(
            incidents
                .iter()
                .map(|incident| render_incident_line(incident, now)),
        );
        Ok(lines.join("\n"))
    }
}
