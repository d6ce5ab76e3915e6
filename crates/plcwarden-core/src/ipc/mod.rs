//! Daemon IPC over a Unix domain socket.
//!
//! The daemon exposes an HTTP/JSON API over a Unix socket. The CLI connects
//! as a client to query status, dispatch commands, read the audit trail and
//! request shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐         Unix socket        ┌──────────────┐
//! │   CLI    │───────────────────────────▶│  IPC Server  │
//! │  agent   │  HTTP/1.1 + JSON           │  (axum)      │
//! └──────────┘                            └──────┬───────┘
//!                                                │
//!                                         ┌──────▼───────┐
//!                                         │  Dispatcher  │
//!                                         └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{IpcClient, IpcClientError};
pub use server::IpcState;
pub use types::*;
