//! Retry policy for Slack Web API calls.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

/// Longest `Retry-After` honoured; Slack rate-limit hints beyond this are
/// clamped so a chat reply is never parked for minutes.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Backoff doubles per attempt up to this many doublings.
const MAX_BACKOFF_DOUBLINGS: u32 = 6;
const ERROR_EXCERPT_CHARS: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlackRetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl SlackRetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// Whether `attempt` (1-based) may be followed by another one after a
    /// response with `status`.
    pub(crate) fn retries_status(&self, attempt: usize, status: StatusCode) -> bool {
        attempt < self.max_attempts
            && (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
    }

    pub(crate) fn retries_transport(&self, attempt: usize, error: &reqwest::Error) -> bool {
        attempt < self.max_attempts
            && (error.is_timeout() || error.is_connect() || error.is_request() || error.is_body())
    }

    /// Pause before the attempt after `attempt`: Slack's own hint when it
    /// sent one, doubling backoff from the base delay otherwise.
    pub(crate) fn delay_after(&self, attempt: usize, headers: Option<&HeaderMap>) -> Duration {
        if let Some(hint) = headers.and_then(retry_after_hint) {
            return hint.min(MAX_RETRY_AFTER);
        }
        let doublings = u32::try_from(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(MAX_BACKOFF_DOUBLINGS);
        self.base_delay.saturating_mul(1_u32 << doublings)
    }
}

fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Leading part of a failed response body, for error messages.
pub(crate) fn error_excerpt(body: &str) -> String {
    match body.char_indices().nth(ERROR_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn retry_after(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn unit_delay_uses_slack_hint_and_clamps_it() {
        let policy = SlackRetryPolicy::new(4, 100);
        assert_eq!(
            policy.delay_after(1, Some(&retry_after("2"))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_after(1, Some(&retry_after("3600"))),
            MAX_RETRY_AFTER
        );
        assert_eq!(
            policy.delay_after(2, Some(&retry_after("soon"))),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn unit_backoff_doubles_then_levels_off() {
        let policy = SlackRetryPolicy::new(4, 100);
        assert_eq!(policy.delay_after(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3, None), Duration::from_millis(400));
        assert_eq!(policy.delay_after(40, None), Duration::from_millis(6_400));
    }

    #[test]
    fn unit_status_retries_stop_at_the_attempt_limit() {
        let policy = SlackRetryPolicy::new(3, 10);
        assert!(policy.retries_status(1, StatusCode::TOO_MANY_REQUESTS));
        assert!(policy.retries_status(2, StatusCode::SERVICE_UNAVAILABLE));
        assert!(!policy.retries_status(3, StatusCode::SERVICE_UNAVAILABLE));
        assert!(!policy.retries_status(1, StatusCode::NOT_FOUND));
    }

    #[test]
    fn unit_error_excerpt_cuts_on_char_boundaries() {
        let long = "é".repeat(ERROR_EXCERPT_CHARS + 5);
        let excerpt = error_excerpt(&long);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.chars().count(), ERROR_EXCERPT_CHARS + 3);
        assert_eq!(error_excerpt("invalid_auth"), "invalid_auth");
    }
}
