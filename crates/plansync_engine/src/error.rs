//! Error types for the sync engine.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type returned by remote collaborators.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type returned by local store collaborators.
pub type StoreResult<T> = Result<T, StoreError>;

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Version mismatch or duplicate key.
    Conflict,
    /// The referenced row no longer exists remotely.
    Missing,
    /// Explicit backoff signal.
    RateLimited,
    /// Infrastructure failure expected to self-resolve.
    Transient,
    /// Anything else, e.g. a malformed payload.
    Permanent,
}

impl ErrorClass {
    /// Lowercase name for logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Conflict => "conflict",
            ErrorClass::Missing => "missing",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

/// A classified failure of a remote call.
///
/// Remote collaborators are responsible for timeouts and for mapping their
/// transport errors into exactly one of these variants before returning.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum RemoteError {
    /// Version mismatch on update or duplicate key on insert.
    #[error("conflict: {message}")]
    Conflict {
        /// Backend message.
        message: String,
    },

    /// Row not found.
    #[error("missing: {message}")]
    Missing {
        /// Backend message.
        message: String,
    },

    /// Backoff requested.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Backend message.
        message: String,
        /// Server hint for when to retry.
        retry_after: Option<Duration>,
    },

    /// Network or server hiccup.
    #[error("transient: {message}")]
    Transient {
        /// Backend message.
        message: String,
    },

    /// Rejected for good.
    #[error("permanent: {message}")]
    Permanent {
        /// Backend message.
        message: String,
    },
}

impl RemoteError {
    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a missing-row error.
    pub fn missing(message: impl Into<String>) -> Self {
        Self::Missing {
            message: message.into(),
        }
    }

    /// Creates a rate-limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Classifies an HTTP-style response. See [`crate::http::classify_status`].
    pub fn from_status(
        status: u16,
        code: Option<&str>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        crate::http::classify_status(status, code, message, retry_after)
    }

    /// Returns the classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Conflict { .. } => ErrorClass::Conflict,
            RemoteError::Missing { .. } => ErrorClass::Missing,
            RemoteError::RateLimited { .. } => ErrorClass::RateLimited,
            RemoteError::Transient { .. } => ErrorClass::Transient,
            RemoteError::Permanent { .. } => ErrorClass::Permanent,
        }
    }

    /// Returns true if the same call may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::RateLimited | ErrorClass::Transient
        )
    }

    /// Retry hint carried by a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure of a local store collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("local store error: {message}")]
pub struct StoreError {
    /// Store message.
    pub message: String,
}

impl StoreError {
    /// Creates a store error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that abort a sync pass.
///
/// Push outcomes (conflict, missing, deferred, permanent) never abort a pass;
/// they are reported through [`crate::SyncReport`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A remote call of the pull phase failed.
    #[error("pull failed for {entity}: {source}")]
    Pull {
        /// Entity type.
        entity: String,
        /// Remote failure.
        source: RemoteError,
    },

    /// A local store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote returned a page that would not move the cursor forward.
    #[error("cursor for {entity} did not advance past {cursor}")]
    StalledCursor {
        /// Entity type.
        entity: String,
        /// Cursor at the time.
        cursor: String,
    },

    /// The remote returned a page out of `(updated_at, id)` order.
    #[error("page for {entity} is not in sync order at row {id}")]
    UnorderedPage {
        /// Entity type.
        entity: String,
        /// First offending row.
        id: String,
    },

    /// Page size of zero.
    #[error("invalid page size {0}")]
    InvalidPageSize(usize),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if the pass can be retried as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Pull { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Retry hint from a rate-limited pull.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Pull { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(RemoteError::transient("reset by peer").is_retryable());
        assert!(RemoteError::rate_limited("slow down", None).is_retryable());
        assert!(!RemoteError::conflict("version").is_retryable());
        assert!(!RemoteError::missing("gone").is_retryable());
        assert!(!RemoteError::permanent("bad payload").is_retryable());
    }

    #[test]
    fn sync_error_retryability_follows_source() {
        let err = SyncError::Pull {
            entity: "tasks".into(),
            source: RemoteError::rate_limited("slow down", Some(Duration::from_secs(3))),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Store(StoreError::new("disk full")).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Pull {
            entity: "events".into(),
            source: RemoteError::transient("timeout"),
        };
        assert_eq!(err.to_string(), "pull failed for events: transient: timeout");
        assert_eq!(
            SyncError::Store(StoreError::new("locked")).to_string(),
            "local store error: locked"
        );
    }

    #[test]
    fn class_names() {
        assert_eq!(RemoteError::missing("x").class().as_str(), "missing");
        assert_eq!(
            RemoteError::rate_limited("x", None).class().as_str(),
            "rate_limited"
        );
    }
}
