#![deny(unsafe_code)]

//! plcwarden CLI. Runs the daemon and talks to it over IPC.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use plcwarden_config::AppConfig;
use plcwarden_core::audit::AuditLog;
use plcwarden_core::dispatch::CommandRequest;
use plcwarden_core::ipc::IpcClient;
use plcwarden_core::result::OperationResult;

/// Guarded variable access and deployment for a PLC runtime.
#[derive(Parser)]
#[command(name = "plcwarden", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "plcwarden.toml")]
    config: PathBuf,

    /// Daemon socket, overriding `[daemon] socket_path`.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground.
    #[command(alias = "start")]
    Serve,

    /// Stop a running daemon.
    Stop,

    /// Show daemon status.
    Status,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Read a controller variable.
    Read {
        /// Symbolic path, e.g. `GVL.nCount`.
        path: String,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a controller variable (requires an armed gate).
    Write {
        path: String,
        value: String,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Open the authorization window for dangerous commands.
    Arm {
        /// Window length in seconds; defaults to `[gate] arm_ttl_secs`.
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Close the authorization window.
    Disarm,

    /// List the commands the daemon understands.
    #[command(name = "commands")]
    Catalog,

    /// Show the audit trail.
    Audit {
        /// Only entries after this sequence number.
        #[arg(long)]
        since: Option<u64>,
    },

    /// Dispatch any command by name.
    Call {
        /// Command name, e.g. `deploy`.
        name: String,

        /// Parameter as `key=value`; JSON values are accepted (`dryRun=true`)
        /// except for `path` and `value`, which are always text.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,

        /// Confirmation token for commands that require one.
        #[arg(long)]
        confirm: Option<String>,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Controller AMS Net ID; defaults to `[target] ams_net_id`.
    #[arg(long)]
    ams_net_id: Option<String>,

    /// Runtime port; defaults to `[target] port`.
    #[arg(long)]
    port: Option<u16>,
}

impl TargetArgs {
    fn apply(&self, mut request: CommandRequest) -> CommandRequest {
        if let Some(id) = &self.ams_net_id {
            request = request.param("amsNetId", id.as_str());
        }
        if let Some(port) = self.port {
            request = request.param("port", port);
        }
        request
    }
}

/// Parameters passed through verbatim. A variable value is text in the
/// controller's own syntax and must not be reinterpreted as JSON.
const TEXT_PARAMS: &[&str] = &["path", "value"];

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = if TEXT_PARAMS.contains(&key) {
        serde_json::Value::String(value.to_string())
    } else {
        serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()))
    };
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let audit = AuditLog::new(config.logging.audit_capacity);
    let audit_reader = audit.reader();
    // The audit layer sees every audit event regardless of the console filter.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(audit)
        .init();

    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.daemon.socket_path));
    let client = IpcClient::new(&socket);

    let success = match cli.command {
        Commands::Serve => {
            info!("Starting plcwarden daemon");
            let mut config = config;
            config.daemon.socket_path = socket.display().to_string();
            let daemon = plcwarden_core::Daemon::from_config(config, audit_reader)?;
            daemon.run().await?;
            true
        }
        Commands::Stop => {
            let resp = client.stop().await?;
            println!("{}", resp.message);
            resp.acknowledged
        }
        Commands::Status => {
            print_json(&client.status().await?)?;
            true
        }
        Commands::Config { show } => {
            if show {
                let toml_str = toml::to_string_pretty(&config).context("serializing config")?;
                println!("{toml_str}");
            } else {
                println!("Configuration at '{}' is valid.", cli.config.display());
            }
            true
        }
        Commands::Read { path, target } => {
            let request = target.apply(CommandRequest::new("read_variable").param("path", path));
            report(client.command(&request).await?)?
        }
        Commands::Write {
            path,
            value,
            target,
        } => {
            let request = target.apply(
                CommandRequest::new("write_variable")
                    .param("path", path)
                    .param("value", value),
            );
            report(client.command(&request).await?)?
        }
        Commands::Arm { ttl } => report(client.arm(ttl).await?)?,
        Commands::Disarm => report(client.disarm().await?)?,
        Commands::Catalog => {
            for cmd in client.commands().await?.commands {
                let flags = match (cmd.spec.requires_arm, cmd.spec.requires_confirm) {
                    (true, true) => "arm+confirm",
                    (true, false) => "arm",
                    _ => "",
                };
                println!("{:<16} {:<12} {}", cmd.name, flags, cmd.description);
            }
            true
        }
        Commands::Audit { since } => {
            print_json(&client.audit(since).await?)?;
            true
        }
        Commands::Call {
            name,
            params,
            confirm,
        } => {
            let mut request = CommandRequest::new(name);
            for (key, value) in params {
                request = request.param(&key, value);
            }
            if let Some(token) = confirm {
                request = request.confirm(token);
            }
            report(client.command(&request).await?)?
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a command result and tell whether it succeeded.
fn report(result: OperationResult) -> Result<bool> {
    print_json(&result)?;
    Ok(result.success)
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        let mut config = AppConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param_accepts_json_and_text() {
        assert_eq!(
            parse_param("dryRun=true").unwrap(),
            ("dryRun".to_string(), serde_json::Value::Bool(true))
        );
        assert_eq!(
            parse_param("port=852").unwrap(),
            ("port".to_string(), serde_json::json!(852))
        );
        assert_eq!(
            parse_param("solutionPath=C:/p/line.sln").unwrap(),
            ("solutionPath".to_string(), serde_json::json!("C:/p/line.sln"))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_parse_param_keeps_variable_values_verbatim() {
        assert_eq!(
            parse_param("value=true").unwrap(),
            ("value".to_string(), serde_json::json!("true"))
        );
        assert_eq!(
            parse_param("value=007").unwrap(),
            ("value".to_string(), serde_json::json!("007"))
        );
        assert_eq!(
            parse_param("value=\"quoted\"").unwrap(),
            ("value".to_string(), serde_json::json!("\"quoted\""))
        );
        assert_eq!(
            parse_param("path=1").unwrap(),
            ("path".to_string(), serde_json::json!("1"))
        );
    }

    #[test]
    fn test_call_collects_params_and_confirm() {
        let cli = Cli::try_parse_from([
            "plcwarden",
            "call",
            "deploy",
            "-p",
            "solutionPath=C:/p/line.sln",
            "--param",
            "skipBuild=true",
            "--confirm",
            "CONFIRM",
        ])
        .unwrap();
        match cli.command {
            Commands::Call {
                name,
                params,
                confirm,
            } => {
                assert_eq!(name, "deploy");
                assert_eq!(params.len(), 2);
                assert_eq!(confirm.as_deref(), Some("CONFIRM"));
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_target_args_fill_request() {
        let args = TargetArgs {
            ams_net_id: Some("5.22.157.86.1.1".to_string()),
            port: Some(852),
        };
        let request = args.apply(CommandRequest::new("read_variable"));
        assert_eq!(request.params["amsNetId"], "5.22.157.86.1.1");
        assert_eq!(request.params["port"], 852);
    }
}
