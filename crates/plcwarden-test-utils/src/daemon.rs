//! Daemon test helpers.
//!
//! [`TestDaemon`] runs a full daemon on a socket inside a temporary
//! directory and hands out connected IPC clients.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use plcwarden_config::AppConfig;
use plcwarden_core::audit::{AuditLog, AuditReader};
use plcwarden_core::automation::Deployer;
use plcwarden_core::daemon::{Daemon, DaemonError};
use plcwarden_core::dispatch::Dispatcher;
use plcwarden_core::ipc::IpcClient;
use plcwarden_core::protocol::Connector;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// A running daemon bound to a temp socket. The temp directory (and the
/// socket with it) is removed when this value is dropped.
pub struct TestDaemon {
    pub daemon: Arc<Daemon>,
    pub socket_path: PathBuf,
    handle: JoinHandle<Result<(), DaemonError>>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with the given backends. The config's socket path is
    /// replaced by one inside a fresh temp directory.
    pub async fn start(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        deployer: Arc<dyn Deployer>,
        audit: AuditReader,
    ) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("plcwarden.sock");

        let mut config = config;
        config.daemon.socket_path = socket_path.display().to_string();

        let dispatcher =
            Dispatcher::from_config(&config, connector, deployer).expect("valid test target");
        let daemon = Arc::new(Daemon::new(config, dispatcher, audit));

        let runner = Arc::clone(&daemon);
        let handle = tokio::spawn(async move { runner.run().await });

        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            daemon,
            socket_path,
            handle,
            _temp_dir: temp_dir,
        }
    }

    /// Start with a throwaway audit log.
    pub async fn start_default(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self::start(config, connector, deployer, AuditLog::new(64).reader()).await
    }

    pub fn client(&self) -> IpcClient {
        IpcClient::new(&self.socket_path)
    }

    /// Request shutdown and wait for the serving loop to finish.
    pub async fn stop(self) -> Result<(), DaemonError> {
        self.daemon.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("daemon did not stop in time")
            .expect("daemon task panicked")
    }
}
