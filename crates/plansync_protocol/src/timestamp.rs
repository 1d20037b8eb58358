//! High-precision timestamps that keep their original text.
//!
//! Remote rows carry `updated_at` with microsecond resolution. Parsing that
//! into a fixed-resolution instant and comparing instants is lossy on some
//! clients, so every ordering decision in the engine is made on the raw
//! string. The parsed instant is kept alongside for display and logging.
//!
//! Raw comparison is only meaningful when all timestamps of one entity type
//! come from the same backend formatter (fixed width, same offset notation).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Error raised when a timestamp string cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid timestamp {raw:?}: {reason}")]
pub struct TimestampError {
    /// The rejected input.
    pub raw: String,
    /// Parser message.
    pub reason: String,
}

/// A timestamp stored as both its original string and a parsed instant.
///
/// Equality, ordering and hashing use the raw string only.
#[derive(Clone)]
pub struct RawTimestamp {
    raw: String,
    instant: DateTime<Utc>,
}

impl RawTimestamp {
    /// Parses an RFC 3339 timestamp or the Postgres text form
    /// (`2024-03-01 09:30:00.123456+00`), keeping the input verbatim.
    pub fn parse(raw: impl Into<String>) -> Result<Self, TimestampError> {
        let raw = raw.into();
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .or_else(|_| DateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f%#z"))
            .map_err(|e| TimestampError {
                raw: raw.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            instant: parsed.with_timezone(&Utc),
            raw,
        })
    }

    /// Formats an instant with fixed microsecond precision.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            raw: instant.to_rfc3339_opts(SecondsFormat::Micros, true),
            instant,
        }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_instant(Utc::now())
    }

    /// The original text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed instant. Not suitable for tie-breaking.
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }
}

impl PartialEq for RawTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for RawTimestamp {}

impl PartialOrd for RawTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RawTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl Hash for RawTimestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawTimestamp({})", self.raw)
    }
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for RawTimestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RawTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for RawTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}
