//! Shared request/response types for daemon IPC.
//!
//! Serialized as JSON over the Unix domain socket. `POST /command` takes a
//! [`CommandRequest`](crate::dispatch::CommandRequest) and answers with an
//! [`OperationResult`](crate::result::OperationResult); the types below cover
//! the remaining routes.

use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::commands::CommandInfo;
use crate::gate::ArmStatus;

/// Daemon health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
}

/// Daemon runtime status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub version: String,
    pub git_hash: String,
    pub uptime_secs: u64,
    pub socket_path: String,
    pub log_level: String,
    pub gate: ArmStatus,
    pub arm_ttl_secs: u64,
    /// `amsNetId:port`, when a default target is configured.
    pub default_target: Option<String>,
    pub connector: String,
    pub deployer: String,
    pub command_timeout_secs: u64,
    pub pid: u32,
}

/// Daemon shutdown response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub acknowledged: bool,
    pub message: String,
}

/// Query string of `GET /audit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Only return entries with a larger sequence number.
    pub since: Option<u64>,
}

/// Audit listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResponse {
    pub entries: Vec<AuditEntry>,
    /// Entries currently retained by the daemon.
    pub total: usize,
}

/// Command catalog response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsResponse {
    pub commands: Vec<CommandInfo>,
}

/// Configuration response (serialized TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub toml: String,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
