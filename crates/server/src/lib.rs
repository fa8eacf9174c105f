//! Wiring and read-only status API for the `opensite` binary.

pub mod api;
pub mod metrics;
pub mod setup;
pub mod state;
