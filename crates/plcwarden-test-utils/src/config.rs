//! Configuration builders for tests.

use plcwarden_config::{AppConfig, SimulatedSymbolConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .arm_ttl_secs(2)
///     .default_target("5.22.157.86.1.1", 851)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn socket_path(mut self, path: &str) -> Self {
        self.config.daemon.socket_path = path.to_string();
        self
    }

    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.daemon.command_timeout_secs = secs;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn arm_ttl_secs(mut self, secs: u64) -> Self {
        self.config.gate.arm_ttl_secs = secs;
        self
    }

    pub fn max_ttl_secs(mut self, secs: u64) -> Self {
        self.config.gate.max_ttl_secs = secs;
        self
    }

    pub fn default_target(mut self, ams_net_id: &str, port: u16) -> Self {
        self.config.target.ams_net_id = Some(ams_net_id.to_string());
        self.config.target.port = port;
        self
    }

    pub fn automation_executable(mut self, path: &str) -> Self {
        self.config.automation.executable = Some(path.to_string());
        self
    }

    pub fn simulator_mode(mut self, mode: &str) -> Self {
        self.config.simulator.enabled = true;
        self.config.simulator.mode = mode.to_string();
        self
    }

    /// Enable the simulator and add one symbol with an initial value.
    pub fn simulated_symbol(mut self, path: &str, type_name: &str, value: &str) -> Self {
        self.config.simulator.enabled = true;
        self.config.simulator.symbols.push(SimulatedSymbolConfig {
            path: path.to_string(),
            type_name: type_name.to_string(),
            value: Some(value.to_string()),
            size: None,
        });
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
