//! # plansync protocol
//!
//! Row, cursor and mutation types shared by the plansync engine and its
//! collaborators.
//!
//! This crate provides:
//! - `RawTimestamp`, a timestamp ordered by its exact original text
//! - `SyncRow`, the contract every synchronized row satisfies
//! - `SyncCursor`, the `(timestamp, id)` pull high-water mark
//! - `InsertRequest` / `UpdateRequest` with their `IdempotencyKey`
//! - `ConflictRecord` for the conflict log
//! - The planner's entity types (events, recurrence rules, overrides, tasks)
//!
//! This is a pure data crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod cursor;
pub mod entities;
mod mutation;
mod row;
mod timestamp;

pub use conflict::{ConflictRecord, PushOperation};
pub use cursor::{admits, SyncCursor};
pub use entities::EntityKind;
pub use mutation::{IdempotencyKey, InsertRequest, UpdateRequest};
pub use row::{compare_keys, sort_for_sync, ServerStamp, SyncRow};
pub use timestamp::{RawTimestamp, TimestampError};
