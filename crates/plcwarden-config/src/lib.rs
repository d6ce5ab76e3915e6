#![deny(unsafe_code)]

//! Configuration loading and validation for plcwarden.
//!
//! Loads TOML configuration files, applies the environment overrides and
//! validates the result. [`AppConfig`] is the central configuration structure
//! shared by the daemon, the CLI and the test fixtures.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable that replaces `gate.arm_ttl_secs`.
pub const ARM_TTL_ENV: &str = "PLCWARDEN_ARM_TTL_SECS";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Authorization gate configuration.
    #[serde(default)]
    pub gate: GateConfig,

    /// Default controller target.
    #[serde(default)]
    pub target: TargetConfig,

    /// External automation tool used for build and deployment commands.
    #[serde(default)]
    pub automation: AutomationConfig,

    /// In-memory controller used when no wire client is linked in.
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Configuration for the daemon process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the daemon serves its control API on.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Caller-level timeout for a single command, in seconds (0 = no timeout).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

fn default_socket_path() -> String {
    "/tmp/plcwarden.sock".to_string()
}

fn default_command_timeout_secs() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Number of audit events retained in memory.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_capacity() -> usize {
    512
}

/// Authorization gate configuration.
///
/// ## TOML Example
///
/// ```toml
/// [gate]
/// arm_ttl_secs = 120
/// max_ttl_secs = 900
/// ```
///
/// `PLCWARDEN_ARM_TTL_SECS` overrides `arm_ttl_secs` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// How long an `arm` request stays valid when no override is given.
    #[serde(default = "default_arm_ttl_secs")]
    pub arm_ttl_secs: u64,

    /// Upper bound accepted for a per-request TTL override.
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            arm_ttl_secs: default_arm_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
        }
    }
}

fn default_arm_ttl_secs() -> u64 {
    300
}

fn default_max_ttl_secs() -> u64 {
    3600
}

/// Default controller addressed when a command omits `amsNetId`/`port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// AMS Net ID of the controller (e.g. "5.22.157.86.1.1").
    #[serde(default)]
    pub ams_net_id: Option<String>,

    /// AMS port of the PLC runtime.
    #[serde(default = "default_target_port")]
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            ams_net_id: None,
            port: default_target_port(),
        }
    }
}

fn default_target_port() -> u16 {
    851
}

/// External automation tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Path to the automation executable. Build and deployment commands
    /// are unavailable when unset.
    #[serde(default)]
    pub executable: Option<String>,

    /// Timeout for one automation run, in seconds.
    #[serde(default = "default_automation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            executable: None,
            timeout_secs: default_automation_timeout_secs(),
        }
    }
}

fn default_automation_timeout_secs() -> u64 {
    300
}

/// In-memory controller configuration.
///
/// ## TOML Example
///
/// ```toml
/// [simulator]
/// enabled = true
/// mode = "run"
///
/// [[simulator.symbols]]
/// path = "MAIN.bRunning"
/// type = "BOOL"
/// value = "FALSE"
///
/// [[simulator.symbols]]
/// path = "GVL.sName"
/// type = "STRING(80)"
/// value = "line 1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Whether the daemon serves commands from the simulator.
    #[serde(default)]
    pub enabled: bool,

    /// Reported controller mode ("run", "config", "stop", ...).
    #[serde(default = "default_simulator_mode")]
    pub mode: String,

    /// Symbols preloaded into the simulated symbol table.
    #[serde(default)]
    pub symbols: Vec<SimulatedSymbolConfig>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_simulator_mode(),
            symbols: Vec::new(),
        }
    }
}

fn default_simulator_mode() -> String {
    "run".to_string()
}

/// A single simulated symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedSymbolConfig {
    /// Symbolic path (e.g. "GVL.nCount").
    pub path: String,

    /// Declared type name (e.g. "DINT", "STRING(80)").
    #[serde(rename = "type")]
    pub type_name: String,

    /// Initial value in text form. Defaults to all-zero bytes.
    #[serde(default)]
    pub value: Option<String>,

    /// Size in bytes, required for types without a fixed width.
    #[serde(default)]
    pub size: Option<usize>,
}

/// Controller mode names, indexed by device state code.
pub const CONTROLLER_MODES: [&str; 20] = [
    "invalid",
    "idle",
    "reset",
    "init",
    "start",
    "run",
    "stop",
    "saveconfig",
    "loadconfig",
    "powerfailure",
    "powergood",
    "error",
    "shutdown",
    "suspend",
    "resume",
    "config",
    "reconfig",
    "stopping",
    "incompatible",
    "exception",
];

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    ///
    /// Environment overrides are applied before validation.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string. No environment overrides.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ARM_TTL_ENV) {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::Validation(format!(
                    "{ARM_TTL_ENV} must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            info!(arm_ttl_secs = secs, "Arm TTL overridden from environment");
            self.gate.arm_ttl_secs = secs;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty".to_string(),
            ));
        }
        if self.logging.audit_capacity == 0 {
            return Err(ConfigError::Validation(
                "logging.audit_capacity must be at least 1".to_string(),
            ));
        }

        if self.gate.arm_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "gate.arm_ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.gate.max_ttl_secs < self.gate.arm_ttl_secs {
            return Err(ConfigError::Validation(format!(
                "gate.max_ttl_secs ({}) must be >= gate.arm_ttl_secs ({})",
                self.gate.max_ttl_secs, self.gate.arm_ttl_secs
            )));
        }

        if self.target.port == 0 {
            return Err(ConfigError::Validation(
                "target.port must be non-zero".to_string(),
            ));
        }
        if let Some(id) = &self.target.ams_net_id {
            if !looks_like_ams_net_id(id) {
                return Err(ConfigError::Validation(format!(
                    "target.ams_net_id must be six dot-separated octets, got {id:?}"
                )));
            }
        }

        if self.automation.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "automation.timeout_secs must be non-zero".to_string(),
            ));
        }
        if matches!(&self.automation.executable, Some(exe) if exe.is_empty()) {
            return Err(ConfigError::Validation(
                "automation.executable must not be empty when set".to_string(),
            ));
        }

        let mode = self.simulator.mode.to_ascii_lowercase();
        if !CONTROLLER_MODES.contains(&mode.as_str()) {
            return Err(ConfigError::Validation(format!(
                "simulator.mode must be one of {:?}, got {:?}",
                CONTROLLER_MODES, self.simulator.mode
            )));
        }
        for (i, symbol) in self.simulator.symbols.iter().enumerate() {
            if symbol.path.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "simulator.symbols[{i}].path must not be empty"
                )));
            }
            if symbol.type_name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "simulator.symbols[{i}].type must not be empty"
                )));
            }
            if symbol.size == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "simulator.symbols[{i}].size must be non-zero"
                )));
            }
        }

        Ok(())
    }
}

/// Shallow syntactic check; the core crate parses the full `AmsNetId`.
fn looks_like_ams_net_id(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 6 && parts.iter().all(|p| p.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.daemon.socket_path, "/tmp/plcwarden.sock");
        assert_eq!(config.daemon.command_timeout_secs, 60);
        assert_eq!(config.gate.arm_ttl_secs, 300);
        assert_eq!(config.target.port, 851);
        assert_eq!(config.logging.level, "info");
        assert!(!config.simulator.enabled);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.gate.arm_ttl_secs, 300);
        assert!(config.automation.executable.is_none());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [daemon]
            socket_path = "/run/plcwarden/ctl.sock"
            command_timeout_secs = 0

            [logging]
            level = "debug"

            [gate]
            arm_ttl_secs = 120
            max_ttl_secs = 600

            [target]
            ams_net_id = "5.22.157.86.1.1"
            port = 852

            [automation]
            executable = "C:/tools/TcAutomation.exe"
            timeout_secs = 900
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.daemon.socket_path, "/run/plcwarden/ctl.sock");
        assert_eq!(config.daemon.command_timeout_secs, 0);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.gate.arm_ttl_secs, 120);
        assert_eq!(config.gate.max_ttl_secs, 600);
        assert_eq!(config.target.ams_net_id.as_deref(), Some("5.22.157.86.1.1"));
        assert_eq!(config.target.port, 852);
        assert_eq!(
            config.automation.executable.as_deref(),
            Some("C:/tools/TcAutomation.exe")
        );
    }

    #[test]
    fn test_validation_rejects_zero_ttl() {
        let toml = r#"
            [gate]
            arm_ttl_secs = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_max_below_default_ttl() {
        let toml = r#"
            [gate]
            arm_ttl_secs = 600
            max_ttl_secs = 60
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("max_ttl_secs"));
    }

    #[test]
    fn test_validation_rejects_bad_ams_net_id() {
        let toml = r#"
            [target]
            ams_net_id = "192.168.0.10"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let toml = r#"
            [target]
            port = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_socket_path() {
        let toml = r#"
            [daemon]
            socket_path = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    // ── Environment overrides ─────────────────────────────────────────

    #[test_log::test]
    fn test_env_override_replaces_ttl() {
        let mut config = AppConfig::default();
        config
            .apply_overrides_from(|key| (key == ARM_TTL_ENV).then(|| "45".to_string()))
            .unwrap();
        assert_eq!(config.gate.arm_ttl_secs, 45);
    }

    #[test]
    fn test_env_override_absent_keeps_config() {
        let mut config = AppConfig::default();
        config.apply_overrides_from(|_| None).unwrap();
        assert_eq!(config.gate.arm_ttl_secs, 300);
    }

    #[test_log::test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides_from(|_| Some("five minutes".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ARM_TTL_ENV));
    }

    // ── Simulator ─────────────────────────────────────────────────────

    #[test]
    fn test_simulator_config_from_toml() {
        let toml = r#"
            [simulator]
            enabled = true
            mode = "Config"

            [[simulator.symbols]]
            path = "MAIN.bRunning"
            type = "BOOL"
            value = "FALSE"

            [[simulator.symbols]]
            path = "GVL.stMotor"
            type = "ST_Motor"
            size = 24
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert!(config.simulator.enabled);
        assert_eq!(config.simulator.mode, "Config");
        assert_eq!(config.simulator.symbols.len(), 2);
        assert_eq!(config.simulator.symbols[0].type_name, "BOOL");
        assert_eq!(config.simulator.symbols[1].size, Some(24));
        assert!(config.simulator.symbols[1].value.is_none());
    }

    #[test]
    fn test_simulator_accepts_transitional_modes() {
        for mode in ["Stopping", "start", "SaveConfig", "exception"] {
            let toml = format!("[simulator]\nmode = \"{mode}\"\n");
            let config = AppConfig::parse(&toml).unwrap();
            assert_eq!(config.simulator.mode, mode);
        }
    }

    #[test]
    fn test_simulator_validation_rejects_unknown_mode() {
        let toml = r#"
            [simulator]
            mode = "turbo"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_simulator_validation_rejects_empty_path() {
        let toml = r#"
            [[simulator.symbols]]
            path = ""
            type = "INT"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plcwarden.toml");
        tokio::fs::write(&path, b"[target]\nport = 852\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.target.port, 852);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/plcwarden.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.target.ams_net_id = Some("10.0.0.5.1.1".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::parse(&text).unwrap();
        assert_eq!(parsed.target.ams_net_id, config.target.ams_net_id);
        assert_eq!(parsed.gate.arm_ttl_secs, config.gate.arm_ttl_secs);
    }
}
