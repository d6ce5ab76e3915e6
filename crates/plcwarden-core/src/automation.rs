//! External automation tool backend.
//!
//! Build and deployment commands are delegated to an external executable
//! invoked as `<exe> <verb> <flags…>`. It prints one JSON object on stdout,
//! which is returned to the caller as the command's payload.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use plcwarden_config::AutomationConfig;

use crate::BoxFuture;
use crate::protocol::AmsNetId;
use crate::result::{ErrorKind, HasErrorKind};

/// Verbs understood by the automation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomationAction {
    Build,
    Info,
    Clean,
    SetTarget,
    Activate,
    Restart,
    Deploy,
}

impl AutomationAction {
    /// The verb passed as the tool's first argument.
    pub fn verb(self) -> &'static str {
        match self {
            AutomationAction::Build => "build",
            AutomationAction::Info => "info",
            AutomationAction::Clean => "clean",
            AutomationAction::SetTarget => "set-target",
            AutomationAction::Activate => "activate",
            AutomationAction::Restart => "restart",
            AutomationAction::Deploy => "deploy",
        }
    }

    fn requires_ams_net_id(self) -> bool {
        matches!(self, AutomationAction::SetTarget | AutomationAction::Deploy)
    }
}

impl fmt::Display for AutomationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Parameters of an automation command, as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutomationArgs {
    pub solution_path: String,
    /// Clean before building. Defaults to `true` for `build`.
    pub clean: Option<bool>,
    pub tc_version: Option<String>,
    pub ams_net_id: Option<String>,
    pub plc_name: Option<String>,
    pub skip_build: bool,
    pub dry_run: bool,
}

impl AutomationArgs {
    pub fn validate(&self, action: AutomationAction) -> Result<(), AutomationError> {
        if self.solution_path.trim().is_empty() {
            return Err(AutomationError::InvalidArgs(format!(
                "{action} requires solutionPath"
            )));
        }
        match &self.ams_net_id {
            Some(id) => {
                id.parse::<AmsNetId>()
                    .map_err(|e| AutomationError::InvalidArgs(e.to_string()))?;
            }
            None if action.requires_ams_net_id() => {
                return Err(AutomationError::InvalidArgs(format!(
                    "{action} requires amsNetId"
                )));
            }
            None => {}
        }
        Ok(())
    }

    /// Command line after the executable: verb first, then flags.
    pub fn to_argv(&self, action: AutomationAction) -> Vec<String> {
        let mut argv = vec![
            action.verb().to_string(),
            "--solution".to_string(),
            self.solution_path.clone(),
        ];
        if action == AutomationAction::Info {
            return argv;
        }
        if action == AutomationAction::Build && self.clean.unwrap_or(true) {
            argv.push("--clean".to_string());
        }
        if action != AutomationAction::Build && action != AutomationAction::Clean {
            if let Some(id) = &self.ams_net_id {
                argv.push("--amsnetid".to_string());
                argv.push(id.clone());
            }
        }
        if action == AutomationAction::Deploy {
            if let Some(plc) = &self.plc_name {
                argv.push("--plc".to_string());
                argv.push(plc.clone());
            }
        }
        if let Some(version) = &self.tc_version {
            argv.push("--tcversion".to_string());
            argv.push(version.clone());
        }
        if action == AutomationAction::Deploy {
            if self.skip_build {
                argv.push("--skip-build".to_string());
            }
            if self.dry_run {
                argv.push("--dry-run".to_string());
            }
        }
        argv
    }
}

/// Errors from the automation backend.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("automation tool is not configured (set [automation] executable)")]
    NotConfigured,

    #[error("invalid automation arguments: {0}")]
    InvalidArgs(String),

    #[error("failed to start automation tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("automation tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("automation tool produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("automation {action} failed: {message}")]
    Failed { action: String, message: String },
}

impl HasErrorKind for AutomationError {
    fn kind(&self) -> ErrorKind {
        match self {
            AutomationError::InvalidArgs(_) => ErrorKind::InvalidRequest,
            AutomationError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Automation,
        }
    }
}

/// Runs automation actions.
pub trait Deployer: Send + Sync {
    /// Short backend name for status displays.
    fn name(&self) -> &str;

    /// Run `action` and return the JSON payload it produced.
    fn run<'a>(
        &'a self,
        action: AutomationAction,
        args: &'a AutomationArgs,
    ) -> BoxFuture<'a, Result<serde_json::Value, AutomationError>>;
}

/// Deployer backed by the configured external executable.
#[derive(Debug, Clone)]
pub struct AutomationTool {
    executable: Option<PathBuf>,
    timeout: Duration,
}

impl AutomationTool {
    pub fn new(executable: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable,
            timeout,
        }
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        Self::new(
            config.executable.as_ref().map(PathBuf::from),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.executable.is_some()
    }
}

impl Deployer for AutomationTool {
    fn name(&self) -> &str {
        "automation-tool"
    }

    fn run<'a>(
        &'a self,
        action: AutomationAction,
        args: &'a AutomationArgs,
    ) -> BoxFuture<'a, Result<serde_json::Value, AutomationError>> {
        Box::pin(async move {
            let exe = self
                .executable
                .as_ref()
                .ok_or(AutomationError::NotConfigured)?;
            args.validate(action)?;
            let argv = args.to_argv(action);

            info!(%action, exe = %exe.display(), "Running automation tool");
            debug!(?argv, "Automation command line");

            let mut proc = tokio::process::Command::new(exe);
            proc.args(&argv)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(dir) = exe.parent().filter(|d| !d.as_os_str().is_empty()) {
                proc.current_dir(dir);
            }

            let start = Instant::now();
            let child = proc.spawn().map_err(AutomationError::Spawn)?;
            let output = tokio::time::timeout(self.timeout, child.wait_with_output())
                .await
                .map_err(|_| AutomationError::Timeout(self.timeout))?
                .map_err(AutomationError::Spawn)?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                %action,
                exit_code = output.status.code().unwrap_or(-1),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Automation tool finished"
            );
            if !output.status.success() {
                warn!(%action, status = %output.status, "Automation tool exited unsuccessfully");
            }

            if stdout.trim().is_empty() {
                let message = if stderr.trim().is_empty() {
                    "no output from automation tool".to_string()
                } else {
                    stderr.trim().to_string()
                };
                return Err(AutomationError::Failed {
                    action: action.to_string(),
                    message,
                });
            }

            let payload: serde_json::Value = serde_json::from_str(stdout.trim())
                .map_err(|e| AutomationError::InvalidOutput(format!("{e}: {}", stdout.trim())))?;
            if !payload.is_object() {
                return Err(AutomationError::InvalidOutput(format!(
                    "expected a JSON object, got {payload}"
                )));
            }
            Ok(payload)
        })
    }
}

/// Message carried by a payload reporting `success: false`, if it does.
pub fn payload_failure(payload: &serde_json::Value) -> Option<String> {
    if payload.get("success").and_then(|v| v.as_bool()) != Some(false) {
        return None;
    }
    let message = ["errorMessage", "error", "message"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .unwrap_or("unknown error");
    Some(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(solution: &str) -> AutomationArgs {
        AutomationArgs {
            solution_path: solution.to_string(),
            ..AutomationArgs::default()
        }
    }

    #[test]
    fn test_build_argv_cleans_by_default() {
        assert_eq!(
            args("C:/p/p.sln").to_argv(AutomationAction::Build),
            vec!["build", "--solution", "C:/p/p.sln", "--clean"]
        );
        let no_clean = AutomationArgs {
            clean: Some(false),
            tc_version: Some("3.1.4026.17".to_string()),
            ..args("x.sln")
        };
        assert_eq!(
            no_clean.to_argv(AutomationAction::Build),
            vec!["build", "--solution", "x.sln", "--tcversion", "3.1.4026.17"]
        );
    }

    #[test]
    fn test_deploy_argv() {
        let a = AutomationArgs {
            ams_net_id: Some("5.22.157.86.1.1".to_string()),
            plc_name: Some("Main".to_string()),
            skip_build: true,
            dry_run: true,
            ..args("x.sln")
        };
        assert_eq!(
            a.to_argv(AutomationAction::Deploy),
            vec![
                "deploy",
                "--solution",
                "x.sln",
                "--amsnetid",
                "5.22.157.86.1.1",
                "--plc",
                "Main",
                "--skip-build",
                "--dry-run",
            ]
        );
    }

    #[test]
    fn test_info_ignores_extra_flags() {
        let a = AutomationArgs {
            tc_version: Some("3.1".to_string()),
            dry_run: true,
            ..args("x.sln")
        };
        assert_eq!(
            a.to_argv(AutomationAction::Info),
            vec!["info", "--solution", "x.sln"]
        );
    }

    #[test]
    fn test_validate() {
        assert!(args("").validate(AutomationAction::Build).is_err());
        assert!(args("x.sln").validate(AutomationAction::Build).is_ok());
        assert!(args("x.sln").validate(AutomationAction::SetTarget).is_err());
        let bad_id = AutomationArgs {
            ams_net_id: Some("1.2.3".to_string()),
            ..args("x.sln")
        };
        let err = bad_id.validate(AutomationAction::Activate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_args_deserialize_camel_case() {
        let a: AutomationArgs = serde_json::from_value(serde_json::json!({
            "solutionPath": "x.sln",
            "amsNetId": "1.2.3.4.1.1",
            "skipBuild": true,
            "unrelated": 5,
        }))
        .unwrap();
        assert_eq!(a.solution_path, "x.sln");
        assert_eq!(a.ams_net_id.as_deref(), Some("1.2.3.4.1.1"));
        assert!(a.skip_build);
        assert!(!a.dry_run);
    }

    #[test]
    fn test_payload_failure() {
        assert_eq!(payload_failure(&serde_json::json!({"success": true})), None);
        assert_eq!(payload_failure(&serde_json::json!({"plcProjects": []})), None);
        assert_eq!(
            payload_failure(&serde_json::json!({"success": false, "error": "no target"})),
            Some("no target".to_string())
        );
        assert_eq!(
            payload_failure(&serde_json::json!({"success": false})),
            Some("unknown error".to_string())
        );
    }

    #[tokio::test]
    async fn test_unconfigured_tool() {
        let tool = AutomationTool::new(None, Duration::from_secs(1));
        let err = tool
            .run(AutomationAction::Build, &args("x.sln"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::NotConfigured));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("tool.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_runs_tool_and_parses_json() {
            let dir = tempfile::tempdir().unwrap();
            let exe = script(
                &dir,
                r#"echo "{\"success\": true, \"verb\": \"$1\", \"argc\": $#}""#,
            );
            let tool = AutomationTool::new(Some(exe), Duration::from_secs(10));
            let payload = tool
                .run(AutomationAction::Build, &args("x.sln"))
                .await
                .unwrap();
            assert_eq!(payload["verb"], "build");
            assert_eq!(payload["argc"], 4);
        }

        #[tokio::test]
        async fn test_invalid_json() {
            let dir = tempfile::tempdir().unwrap();
            let exe = script(&dir, "echo not json");
            let tool = AutomationTool::new(Some(exe), Duration::from_secs(10));
            let err = tool
                .run(AutomationAction::Clean, &args("x.sln"))
                .await
                .unwrap_err();
            assert!(matches!(err, AutomationError::InvalidOutput(_)));
        }

        #[tokio::test]
        async fn test_empty_stdout_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let exe = script(&dir, "echo 'solution missing' >&2\nexit 2");
            let tool = AutomationTool::new(Some(exe), Duration::from_secs(10));
            let err = tool
                .run(AutomationAction::Build, &args("x.sln"))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("solution missing"));
        }

        #[tokio::test]
        async fn test_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let exe = script(&dir, "sleep 10");
            let tool = AutomationTool::new(Some(exe), Duration::from_millis(200));
            let err = tool
                .run(AutomationAction::Build, &args("x.sln"))
                .await
                .unwrap_err();
            assert!(matches!(err, AutomationError::Timeout(_)));
            assert_eq!(err.kind(), ErrorKind::Timeout);
        }
    }
}
