//! Classification of HTTP-style backend responses.
//!
//! Remote collaborators talking to a REST backend can map every failed
//! response through [`classify_status`] so the push engine sees a
//! [`RemoteError`] with the right class.

use crate::error::RemoteError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Postgres `unique_violation`.
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// PostgREST "no rows" for single-object requests.
pub const PGRST_NO_ROWS: &str = "PGRST116";

/// Maps a status code and optional backend error code to a [`RemoteError`].
///
/// | Response | Class |
/// |---|---|
/// | 409, 412, code `23505` | conflict |
/// | 404, 410, code `PGRST116` | missing |
/// | 429 | rate limited |
/// | 0 (no response), 408, 425, 500, 502, 503, 504 | transient |
/// | anything else | permanent |
///
/// The backend code wins over the status, since some gateways wrap unique
/// violations in a 400.
pub fn classify_status(
    status: u16,
    code: Option<&str>,
    message: impl Into<String>,
    retry_after: Option<Duration>,
) -> RemoteError {
    let message = message.into();

    match code {
        Some(PG_UNIQUE_VIOLATION) => return RemoteError::conflict(message),
        Some(PGRST_NO_ROWS) => return RemoteError::missing(message),
        _ => {}
    }

    match status {
        409 | 412 => RemoteError::conflict(message),
        404 | 410 => RemoteError::missing(message),
        429 => RemoteError::rate_limited(message, retry_after),
        0 | 408 | 425 | 500 | 502 | 503 | 504 => RemoteError::transient(message),
        _ => RemoteError::permanent(message),
    }
}

/// Parses a `Retry-After` header: delta seconds or an HTTP date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
