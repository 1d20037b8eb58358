//! # plansync engine
//!
//! Incremental bidirectional sync between a local store and a remote
//! backend, one entity type at a time.
//!
//! This crate provides:
//! - Cursor-based pull with `(updated_at, id)` tie-breaking
//! - Push with bulk inserts, per-row fallback and version-gated updates
//! - Error classification for REST-style backends
//! - A multi-entity plan that runs parents before children
//! - In-memory collaborators for simulation and tests
//!
//! ## Architecture
//!
//! Each pass is **pull-then-push**:
//! 1. Pull remote pages after the persisted cursor and apply them locally
//! 2. Push dirty local rows as inserts or compare-and-swap updates
//!
//! The engine is stateless. A [`SyncSpec`] bundles the collaborator
//! functions for one entity type; the local store owns the cursor, the
//! dirty set and the conflict log.
//!
//! ## Key Invariants
//!
//! - Every remote row after the cursor is applied exactly once per pass
//! - The cursor never moves backwards
//! - A row is marked clean only after the remote returned it
//! - A stale update is a conflict, never an overwrite

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod http;
pub mod memory;
mod plan;
mod pull;
mod push;
mod report;
mod runner;
mod spec;

pub use config::{PullTermination, RetryConfig, SyncConfig};
pub use error::{
    ErrorClass, RemoteError, RemoteResult, StoreError, StoreResult, SyncError, SyncResult,
};
pub use plan::{EntitySync, PlanReport, SyncPlan};
pub use report::{PushFailure, SyncReport};
pub use runner::{CancelToken, PhaseHook, SyncPhase, SyncRunner};
pub use spec::{
    version_is_absent, ApplyPageFn, FetchOneFn, FetchSinceFn, IdempotencyKeyFn,
    InsertReturningFn, IsInsertFn, MarkCleanFn, PayloadFn, ReadCursorFn, ReadDirtyFn,
    RecordConflictsFn, ResetCursorFn, SyncSpec, UpdateIfVersionMatchesFn,
};
