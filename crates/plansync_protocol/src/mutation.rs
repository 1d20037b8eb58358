//! Remote mutation requests and idempotency keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

/// Client-supplied token that lets the backend deduplicate retries.
///
/// A retried mutation carrying the same key returns the originally computed
/// result instead of being applied again. The local store owns key
/// assignment: one key per distinct local edit, reused across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wraps an existing key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh random key.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Derives a stable key for one local edit of a row.
    ///
    /// Same inputs always yield the same key, so a crash between sending a
    /// mutation and marking the row clean replays with the original key.
    pub fn derive(entity: &str, id: &str, version: Option<i64>, revision: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entity.as_bytes());
        hasher.update([0u8]);
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        match version {
            Some(v) => hasher.update(v.to_be_bytes()),
            None => hasher.update(b"new"),
        }
        hasher.update(revision.to_be_bytes());

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row to create remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRequest<I> {
    /// Client-generated id of the row.
    pub id: String,
    /// Deduplication key.
    pub idempotency_key: IdempotencyKey,
    /// Wire payload.
    pub payload: I,
}

/// A version-gated update.
///
/// The backend applies `payload` only if the stored version equals
/// `expected_version`, and otherwise returns no row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest<U> {
    /// Id of the row to patch.
    pub id: String,
    /// Version the client last saw.
    pub expected_version: i64,
    /// Deduplication key.
    pub idempotency_key: IdempotencyKey,
    /// Wire payload.
    pub payload: U,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_stable() {
        let a = IdempotencyKey::derive("tasks", "t-1", Some(3), 7);
        let b = IdempotencyKey::derive("tasks", "t-1", Some(3), 7);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn derived_keys_differ_per_edit() {
        let base = IdempotencyKey::derive("tasks", "t-1", Some(3), 7);
        assert_ne!(base, IdempotencyKey::derive("tasks", "t-1", Some(3), 8));
        assert_ne!(base, IdempotencyKey::derive("tasks", "t-1", Some(4), 7));
        assert_ne!(base, IdempotencyKey::derive("tasks", "t-1", None, 7));
        assert_ne!(base, IdempotencyKey::derive("events", "t-1", Some(3), 7));
    }

    #[test]
    fn random_keys_are_unique() {
        assert_ne!(IdempotencyKey::random(), IdempotencyKey::random());
    }

    #[test]
    fn key_serializes_transparently() {
        let key = IdempotencyKey::new("abc");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"abc\"");
    }
}
