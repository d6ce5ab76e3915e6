//! Daemon process: startup, shutdown and the IPC serving loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use plcwarden_config::AppConfig;

use crate::audit::AuditReader;
use crate::automation::AutomationTool;
use crate::dispatch::Dispatcher;
use crate::ipc::server::{self, IpcState};
use crate::protocol::{Connector, SimulatedController};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The plcwarden daemon: one dispatcher behind one IPC socket.
pub struct Daemon {
    config: AppConfig,
    dispatcher: Arc<Dispatcher>,
    audit: AuditReader,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl Daemon {
    /// Create a daemon around an already-built dispatcher.
    pub fn new(config: AppConfig, dispatcher: Dispatcher, audit: AuditReader) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            audit,
            shutdown_tx,
            _shutdown_rx,
        }
    }

    /// Build a daemon whose controller backend is the given connector.
    pub fn with_connector(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        audit: AuditReader,
    ) -> Result<Self, DaemonError> {
        let deployer = Arc::new(AutomationTool::from_config(&config.automation));
        let dispatcher = Dispatcher::from_config(&config, connector, deployer)
            .map_err(|e| DaemonError::Startup(e.to_string()))?;
        Ok(Self::new(config, dispatcher, audit))
    }

    /// Build a daemon from configuration alone.
    ///
    /// No wire-level protocol client ships with this crate, so the only
    /// backend available here is the `[simulator]` section. Embedders with a
    /// real client use [`Daemon::with_connector`].
    pub fn from_config(config: AppConfig, audit: AuditReader) -> Result<Self, DaemonError> {
        if !config.simulator.enabled {
            return Err(DaemonError::Startup(
                "no controller backend: enable [simulator] or embed a Connector".to_string(),
            ));
        }
        let sim = SimulatedController::from_config(&config.simulator)
            .map_err(|e| DaemonError::Startup(format!("simulator: {e}")))?;
        info!(
            mode = %sim.mode(),
            symbols = config.simulator.symbols.len(),
            "Using simulated controller"
        );
        Self::with_connector(config, Arc::new(sim), audit)
    }

    /// Serve IPC until a shutdown signal or Ctrl-C is received.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let socket_path = server::socket_path_from_config(&self.config);
        info!(
            version = %crate::build_info::version_string(),
            socket = %socket_path.display(),
            connector = self.dispatcher.connector_name(),
            deployer = self.dispatcher.deployer_name(),
            "plcwarden daemon starting"
        );

        let (_config_tx, config_rx) = watch::channel(self.config.clone());
        let state = Arc::new(IpcState {
            config: config_rx,
            shutdown_tx: self.shutdown_tx.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            audit: self.audit.clone(),
            started_at: Instant::now(),
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let server_rx = self.shutdown_tx.subscribe();
        let mut server =
            tokio::spawn(async move { server::serve(&socket_path, state, server_rx).await });

        tokio::select! {
            joined = &mut server => {
                // The server only returns on its own when binding failed.
                return flatten(joined);
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping daemon");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                self.shutdown();
            }
        }

        flatten(server.await)?;
        info!("Daemon stopped");
        Ok(())
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

fn flatten(
    joined: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match joined {
        Ok(result) => result.map_err(DaemonError::Io),
        Err(e) => Err(DaemonError::Server(e.to_string())),
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("IPC server task failed: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
