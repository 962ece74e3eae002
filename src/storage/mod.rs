//! Storage layer model: core entities and the boundary guard that keeps the
//! three layers (active context, snapshots, history) from contaminating
//! each other.

pub mod guard;
mod types;

pub use types::*;
