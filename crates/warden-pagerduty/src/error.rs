//! Failure taxonomy for PagerDuty orchestration flows.

use thiserror::Error;

/// Reply used for every remote-side failure; internal detail stays in logs.
pub const GENERIC_REMOTE_FAILURE: &str = "Something went wrong talking to PagerDuty.";

#[derive(Debug, Error)]
/// Failure classes raised by [`crate::RemoteClient`].
pub enum RemoteError {
    #[error("pagerduty {endpoint} request failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("pagerduty {endpoint} returned status {status}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode pagerduty {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("pagerduty {endpoint} returned an unexpected response shape")]
    UnexpectedShape { endpoint: String },
}

impl RemoteError {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. }
            | Self::UnexpectedShape { endpoint } => endpoint,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
/// Outcome classes for chat-driven and background flows.
pub enum OpsError {
    /// Bad user input: unparseable duration, unknown person, out-of-bounds value.
    #[error("{0}")]
    Validation(String),
    /// A precondition on remote state did not hold.
    #[error("{0}")]
    Guard(String),
    /// Nothing to do; reported to the user but never logged as a failure.
    #[error("{0}")]
    NoOp(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Some chunks of a bulk update failed. Applied chunks stay applied.
    #[error("bulk update applied {applied} incidents but {failed_chunks} chunk(s) failed: {source}")]
    PartialBatch {
        applied: usize,
        failed_chunks: usize,
        #[source]
        source: RemoteError,
    },
    /// Remote work was left half done; the message tells the user what to
    /// finish by hand.
    #[error("{message}")]
    Incomplete { message: String, failed: usize },
    #[error(transparent)]
    Local(#[from] anyhow::Error),
}

impl OpsError {
    /// Text safe to post back to chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message)
            | Self::Guard(message)
            | Self::NoOp(message)
            | Self::Incomplete { message, .. } => message.clone(),
            Self::Remote(_) | Self::PartialBatch { .. } => GENERIC_REMOTE_FAILURE.to_string(),
            Self::Local(_) => "Something went wrong on my side; check the bot logs.".to_string(),
        }
    }

    /// True for failures that deserve error-level logging.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Remote(_) | Self::PartialBatch { .. } | Self::Incomplete { .. } | Self::Local(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_never_echo_response_bodies() {
        let error = OpsError::Remote(RemoteError::Status {
            endpoint: "PUT /incidents".to_string(),
            status: 401,
            body: "{\"error\":{\"message\":\"Unauthorized\"}}".to_string(),
        });
        assert_eq!(error.user_message(), GENERIC_REMOTE_FAILURE);
        assert!(error.is_failure());
    }

    #[test]
    fn guard_and_validation_messages_pass_through() {
        let guard = OpsError::Guard("Maintenance is already ongoing".to_string());
        assert_eq!(guard.user_message(), "Maintenance is already ongoing");
        assert!(!guard.is_failure());
        assert!(!OpsError::NoOp("nothing".to_string()).is_failure());
    }

    #[test]
    fn incomplete_work_keeps_its_instructions_but_counts_as_failure() {
        let error = OpsError::Incomplete {
            message: "End them manually.".to_string(),
            failed: 1,
        };
        assert_eq!(error.user_message(), "End them manually.");
        assert!(error.is_failure());
    }
}
