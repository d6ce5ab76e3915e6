//! IPC client over the daemon's Unix domain socket.
//!
//! Used by the CLI to dispatch commands and inspect the running daemon.
//! Speaks HTTP/1.1 over the socket through `hyper`.

use std::path::PathBuf;

use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;

use super::types::*;
use crate::dispatch::CommandRequest;
use crate::result::OperationResult;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon returned error: {0}")]
    DaemonError(String),
}

/// Client for the plcwarden daemon socket.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Whether the socket file exists (the daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    async fn request(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, IpcClientError> {
        if !self.daemon_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake::<
            _,
            http_body_util::Full<Bytes>,
        >(TokioIo::new(stream))
        .await
        .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "IPC connection error");
            }
        });

        debug!(%method, path, "IPC request");

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }

        let req = builder
            .body(http_body_util::Full::new(
                body.map(Bytes::from).unwrap_or_default(),
            ))
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))?;

        let status = resp.status();
        let resp_body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&resp_body) {
                return Err(IpcClientError::DaemonError(err.error));
            }
            return Err(IpcClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }

        Ok(resp_body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, IpcClientError> {
        let body = self.request(hyper::Method::GET, path, None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("{what}: {e}")))
    }

    // ── Typed API methods ──────────────────────────────────────────────

    pub async fn health(&self) -> Result<HealthResponse, IpcClientError> {
        self.get("/health", "health").await
    }

    pub async fn status(&self) -> Result<StatusResponse, IpcClientError> {
        self.get("/status", "status").await
    }

    /// Request daemon shutdown.
    pub async fn stop(&self) -> Result<StopResponse, IpcClientError> {
        let body = self.request(hyper::Method::POST, "/stop", None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("stop: {e}")))
    }

    /// The daemon's effective configuration as TOML.
    pub async fn config(&self) -> Result<ConfigResponse, IpcClientError> {
        self.get("/config", "config").await
    }

    pub async fn commands(&self) -> Result<CommandsResponse, IpcClientError> {
        self.get("/commands", "commands").await
    }

    /// Audit entries, optionally only those newer than `since`.
    pub async fn audit(&self, since: Option<u64>) -> Result<AuditResponse, IpcClientError> {
        match since {
            Some(seq) => self.get(&format!("/audit?since={seq}"), "audit").await,
            None => self.get("/audit", "audit").await,
        }
    }

    /// Dispatch a command. Refusals and failures come back as an
    /// unsuccessful [`OperationResult`], not as an `Err`.
    pub async fn command(
        &self,
        request: &CommandRequest,
    ) -> Result<OperationResult, IpcClientError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| IpcClientError::Parse(format!("failed to serialize request: {e}")))?;
        let resp = self
            .request(hyper::Method::POST, "/command", Some(body))
            .await?;
        serde_json::from_slice(&resp).map_err(|e| IpcClientError::Parse(format!("command: {e}")))
    }

    pub async fn read_variable(&self, path: &str) -> Result<OperationResult, IpcClientError> {
        self.command(&CommandRequest::new("read_variable").param("path", path))
            .await
    }

    pub async fn write_variable(
        &self,
        path: &str,
        value: &str,
    ) -> Result<OperationResult, IpcClientError> {
        self.command(
            &CommandRequest::new("write_variable")
                .param("path", path)
                .param("value", value),
        )
        .await
    }

    pub async fn arm(&self, ttl_secs: Option<u64>) -> Result<OperationResult, IpcClientError> {
        let mut request = CommandRequest::new("arm");
        if let Some(ttl) = ttl_secs {
            request = request.param("ttlSeconds", ttl);
        }
        self.command(&request).await
    }

    pub async fn disarm(&self) -> Result<OperationResult, IpcClientError> {
        self.command(&CommandRequest::new("disarm")).await
    }
}
