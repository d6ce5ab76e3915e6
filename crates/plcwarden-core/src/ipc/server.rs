//! IPC server: an axum HTTP router served over a Unix domain socket.
//!
//! The daemon binds a Unix socket and exposes a JSON API for the CLI and
//! automated callers to dispatch commands, query status, read the audit
//! trail and request shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use plcwarden_config::AppConfig;

use super::types::*;
use crate::audit::AuditReader;
use crate::commands;
use crate::daemon::ShutdownSignal;
use crate::dispatch::{CommandRequest, Dispatcher};
use crate::result::OperationResult;

/// Shared state accessible to all IPC route handlers.
pub struct IpcState {
    pub config: watch::Receiver<AppConfig>,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
    pub dispatcher: Arc<Dispatcher>,
    pub audit: AuditReader,
    pub started_at: Instant,
}

/// Build the axum router with all IPC routes.
pub fn router(state: Arc<IpcState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/command", post(handle_command))
        .route("/commands", get(handle_commands))
        .route("/config", get(handle_config))
        .route("/audit", get(handle_audit))
        .route("/stop", post(handle_stop))
        .with_state(state)
}

/// Start the IPC server on the given Unix socket path.
///
/// Removes any stale socket file before binding. Runs until the
/// shutdown signal is received.
pub async fn serve(
    socket_path: &Path,
    state: Arc<IpcState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("IPC server shutting down");
        })
        .await?;

    std::fs::remove_file(socket_path).ok();
    Ok(())
}

/// The socket path configured for the daemon.
pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.daemon.socket_path)
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
    })
}

async fn handle_status(State(state): State<Arc<IpcState>>) -> Json<StatusResponse> {
    let config = state.config.borrow().clone();
    let dispatcher = &state.dispatcher;

    Json(StatusResponse {
        running: true,
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        socket_path: config.daemon.socket_path.clone(),
        log_level: config.logging.level.clone(),
        gate: dispatcher.gate().status(),
        arm_ttl_secs: dispatcher.gate().default_ttl().as_secs(),
        default_target: dispatcher.default_target().map(|t| t.to_string()),
        connector: dispatcher.connector_name().to_string(),
        deployer: dispatcher.deployer_name().to_string(),
        command_timeout_secs: config.daemon.command_timeout_secs,
        pid: std::process::id(),
    })
}

async fn handle_command(
    State(state): State<Arc<IpcState>>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<OperationResult>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = body.map_err(|rejection| {
        warn!(error = %rejection, "Rejected malformed command request");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("malformed command request: {rejection}"),
            }),
        )
    })?;
    info!(command = %request.command, "Command received via IPC");
    // A client that hangs up must not cancel a command that already started.
    state
        .dispatcher
        .spawn_dispatch(request)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "Command task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("command task failed: {e}"),
                }),
            )
        })
}

async fn handle_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: commands::catalog(),
    })
}

async fn handle_config(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<ConfigResponse>, (StatusCode, Json<ErrorResponse>)> {
    let config = state.config.borrow().clone();
    match toml::to_string_pretty(&config) {
        Ok(toml_str) => Ok(Json(ConfigResponse { toml: toml_str })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to serialize config: {e}"),
            }),
        )),
    }
}

async fn handle_audit(
    State(state): State<Arc<IpcState>>,
    Query(query): Query<AuditQuery>,
) -> Json<AuditResponse> {
    let entries = match query.since {
        Some(seq) => state.audit.since(seq),
        None => state.audit.entries(),
    };
    Json(AuditResponse {
        entries,
        total: state.audit.len(),
    })
}

async fn handle_stop(State(state): State<Arc<IpcState>>) -> (StatusCode, Json<StopResponse>) {
    info!("Stop requested via IPC");
    let _ = state.shutdown_tx.send(ShutdownSignal);
    (
        StatusCode::OK,
        Json(StopResponse {
            acknowledged: true,
            message: "Shutdown initiated".to_string(),
        }),
    )
}
