use chrono::{DateTime, TimeZone, Utc};

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Converts persisted unix seconds into a UTC datetime, clamping values chrono
/// cannot represent to the epoch.
pub fn unix_to_datetime(unix_seconds: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(unix_seconds).unwrap_or(i64::MAX);
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
