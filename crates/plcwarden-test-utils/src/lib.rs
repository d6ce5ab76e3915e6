#![deny(unsafe_code)]

//! Shared test utilities for the plcwarden workspace.
//!
//! Provides reusable fixtures, config builders, a socket-backed test daemon
//! and tracing helpers so that integration tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! plcwarden-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod fixtures;
pub mod tracing_setup;
