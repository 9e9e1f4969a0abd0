//! Session State Machine.
//!
//! Owns the lifecycle of the single live match: search, match, active, end.

mod state;

pub use state::*;
