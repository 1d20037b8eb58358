//! CLI command implementations.

pub mod classify;
pub mod inspect;
pub mod simulate;
