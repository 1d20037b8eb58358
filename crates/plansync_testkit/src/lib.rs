//! # plansync testkit
//!
//! Test utilities for plansync.
//!
//! This crate provides:
//! - Harnesses pairing an in-memory store with an in-memory remote
//! - Property-based test generators using proptest
//! - Stress helpers that sync while the remote keeps changing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plansync_testkit::prelude::*;
//!
//! #[test]
//! fn pulls_everything() {
//!     with_task_pair(|pair| {
//!         pair.remote.create(task("a"));
//!         let report = pair.run(10).unwrap();
//!         assert_eq!(report.pulled, 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
