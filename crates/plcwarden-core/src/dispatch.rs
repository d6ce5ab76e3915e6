//! Command dispatcher.
//!
//! Every request flows through the same chain:
//!
//! ```text
//! request ─▶ parse name ─▶ gate command? ── yes ─▶ ArmGate (no lane)
//!                               │ no
//!                               ▼
//!                         acquire lane ─▶ requires arm? ─▶ requires confirm? ─▶ execute
//! ```
//!
//! The lane is a single async mutex: at most one controller or automation
//! command runs per process. Protocol work runs on the blocking pool and
//! holds the lane until it returns, even if the caller's timeout fires
//! first. `arm`, `disarm` and `arm_status` only touch the gate and never
//! wait behind the lane, so a disarm is never queued behind a deployment.
//!
//! Automation commands are bounded by the longer of the command timeout and
//! the automation tool's own timeout plus [`AUTOMATION_GRACE`], so the tool's
//! timeout always fires first and reports its own error.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use plcwarden_config::AppConfig;

use crate::audit::AUDIT_TARGET;
use crate::automation::{self, AutomationAction, AutomationArgs, AutomationError, Deployer};
use crate::commands::Command;
use crate::confirm::{self, ConfirmationError};
use crate::gate::{ArmGate, GateError};
use crate::protocol::{AmsNetId, AmsNetIdParseError, Connector, ControllerMode, ProtocolError, Target};
use crate::result::{ErrorKind, HasErrorKind, OperationResult};
use crate::variables::VariableService;

/// Slack added on top of the automation tool's own timeout.
pub const AUTOMATION_GRACE: Duration = Duration::from_secs(5);

/// One invocation as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn confirm(mut self, token: impl Into<String>) -> Self {
        self.confirm = Some(token.into());
        self
    }
}

/// Reasons a dispatch did not produce the operation's own result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("command '{command}' is refused: the gate is not armed (call arm first)")]
    NotArmed { command: String },

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error("command timed out after {0:?}; the controller operation may still complete")]
    Timeout(Duration),

    #[error("command worker failed: {0}")]
    Worker(String),
}

impl HasErrorKind for DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NotArmed { .. } => ErrorKind::NotArmed,
            DispatchError::Confirmation(e) => e.kind(),
            DispatchError::UnknownCommand(_) | DispatchError::InvalidParams(_) => {
                ErrorKind::InvalidRequest
            }
            DispatchError::Gate(e) => e.kind(),
            DispatchError::Protocol(e) => e.kind(),
            DispatchError::Automation(e) => e.kind(),
            DispatchError::Timeout(_) => ErrorKind::Timeout,
            DispatchError::Worker(_) => ErrorKind::Internal,
        }
    }
}

/// Routes commands through the gate to the variable service or the deployer.
pub struct Dispatcher {
    gate: Arc<ArmGate>,
    variables: VariableService,
    deployer: Arc<dyn Deployer>,
    default_ams_net_id: Option<AmsNetId>,
    default_port: u16,
    command_timeout: Option<Duration>,
    automation_timeout: Option<Duration>,
    lane: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        gate: Arc<ArmGate>,
        connector: Arc<dyn Connector>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            gate,
            variables: VariableService::new(connector),
            deployer,
            default_ams_net_id: None,
            default_port: 851,
            command_timeout: None,
            automation_timeout: None,
            lane: Arc::new(Mutex::new(())),
        }
    }

    /// Build a dispatcher from configuration with the given backends.
    pub fn from_config(
        config: &AppConfig,
        connector: Arc<dyn Connector>,
        deployer: Arc<dyn Deployer>,
    ) -> Result<Self, AmsNetIdParseError> {
        let default_ams_net_id: Option<AmsNetId> = config
            .target
            .ams_net_id
            .as_deref()
            .map(str::parse)
            .transpose()?;
        let timeout = match config.daemon.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let tool_limit = Duration::from_secs(config.automation.timeout_secs) + AUTOMATION_GRACE;
        Ok(
            Self::new(Arc::new(ArmGate::from_config(&config.gate)), connector, deployer)
                .with_default_target(default_ams_net_id, config.target.port)
                .with_command_timeout(timeout)
                .with_automation_timeout(timeout.map(|limit| limit.max(tool_limit))),
        )
    }

    pub fn with_default_target(mut self, ams_net_id: Option<AmsNetId>, port: u16) -> Self {
        self.default_ams_net_id = ams_net_id;
        self.default_port = port;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Separate bound for automation commands. Falls back to the command
    /// timeout when unset.
    pub fn with_automation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.automation_timeout = timeout;
        self
    }

    fn timeout_for(&self, command: Command) -> Option<Duration> {
        if command.is_automation() {
            self.automation_timeout.or(self.command_timeout)
        } else {
            self.command_timeout
        }
    }

    pub fn gate(&self) -> &Arc<ArmGate> {
        &self.gate
    }

    pub fn connector_name(&self) -> &str {
        self.variables.connector_name()
    }

    pub fn deployer_name(&self) -> &str {
        self.deployer.name()
    }

    pub fn default_target(&self) -> Option<Target> {
        self.default_ams_net_id
            .map(|id| Target::new(id, self.default_port))
    }

    /// Dispatch one request. Never fails; errors become a failed result.
    pub async fn dispatch(&self, request: CommandRequest) -> OperationResult {
        let command = request.command.clone();
        match self.try_dispatch(request).await {
            Ok(result) => result,
            Err(err) => {
                debug!(%command, error = %err, kind = %err.kind(), "Command failed");
                OperationResult::from_error(&err)
            }
        }
    }

    /// Dispatch on a spawned task. The command runs to completion even if
    /// the caller stops waiting on the returned handle.
    pub fn spawn_dispatch(self: &Arc<Self>, request: CommandRequest) -> JoinHandle<OperationResult> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(request).await })
    }

    pub async fn try_dispatch(
        &self,
        request: CommandRequest,
    ) -> Result<OperationResult, DispatchError> {
        let command: Command = request
            .command
            .parse()
            .map_err(|_| DispatchError::UnknownCommand(request.command.clone()))?;
        debug!(%command, "Dispatching command");

        match command {
            Command::Arm => {
                let ttl = u64_param(&request.params, "ttlSeconds")?;
                let status = self.gate.arm(ttl)?;
                return Ok(OperationResult::with_data(json!(status)));
            }
            Command::Disarm => return Ok(OperationResult::with_data(json!(self.gate.disarm()))),
            Command::ArmStatus => return Ok(OperationResult::with_data(json!(self.gate.status()))),
            _ => {}
        }

        match self.timeout_for(command) {
            Some(limit) => tokio::time::timeout(limit, self.run_in_lane(command, &request))
                .await
                .map_err(|_| {
                    warn!(%command, ?limit, "Command exceeded caller timeout");
                    DispatchError::Timeout(limit)
                })?,
            None => self.run_in_lane(command, &request).await,
        }
    }

    async fn run_in_lane(
        &self,
        command: Command,
        request: &CommandRequest,
    ) -> Result<OperationResult, DispatchError> {
        let lane = self.lane.clone().lock_owned().await;

        let spec = command.spec();
        if spec.requires_arm && !self.gate.check_armed() {
            warn!(target: AUDIT_TARGET, event = "refused_not_armed", %command, "Dangerous command refused");
            return Err(DispatchError::NotArmed {
                command: command.to_string(),
            });
        }
        if let Err(err) = confirm::check_confirmation(command.name(), &spec, request.confirm.as_deref()) {
            warn!(target: AUDIT_TARGET, event = "refused_confirmation", %command, "Dangerous command refused");
            return Err(err.into());
        }
        if spec.requires_arm {
            info!(target: AUDIT_TARGET, event = "authorized", %command, "Dangerous command authorized");
        }

        let result = match command {
            Command::ReadVariable => {
                let target = self.target_param(&request.params)?;
                let path = required_str(&request.params, "path")?.to_string();
                self.blocking(lane, move |vars| vars.read_variable(&target, &path))
                    .await?
            }
            Command::WriteVariable => {
                let target = self.target_param(&request.params)?;
                let path = required_str(&request.params, "path")?.to_string();
                let text = value_param(&request.params, "value")?;
                self.blocking(lane, move |vars| vars.write_variable(&target, &path, &text))
                    .await?
            }
            Command::GetState => {
                let target = self.target_param(&request.params)?;
                let mode = self
                    .blocking(lane, move |vars| vars.controller_mode(&target))
                    .await??;
                mode_result(mode)
            }
            other => {
                let action = automation_action(other)?;
                let args = self.automation_args(action, &request.params)?;
                let outcome = self.deployer.run(action, &args).await;
                drop(lane);
                let payload = outcome?;
                if let Some(message) = automation::payload_failure(&payload) {
                    return Err(AutomationError::Failed {
                        action: action.to_string(),
                        message,
                    }
                    .into());
                }
                OperationResult::with_data(payload)
            }
        };

        if spec.requires_arm {
            info!(
                target: AUDIT_TARGET,
                event = "executed",
                %command,
                success = result.success,
                "Dangerous command executed"
            );
        }
        Ok(result)
    }

    /// Run protocol work on the blocking pool. The lane is released when the work returns.
    async fn blocking<T, F>(&self, lane: OwnedMutexGuard<()>, work: F) -> Result<T, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&VariableService) -> T + Send + 'static,
    {
        let variables = self.variables.clone();
        tokio::task::spawn_blocking(move || {
            let _lane = lane;
            work(&variables)
        })
        .await
        .map_err(|e| DispatchError::Worker(e.to_string()))
    }

    fn target_param(&self, params: &Map<String, Json>) -> Result<Target, DispatchError> {
        let ams_net_id: AmsNetId = match optional_str(params, "amsNetId")? {
            Some(text) => text
                .parse()
                .map_err(|e: AmsNetIdParseError| DispatchError::InvalidParams(e.to_string()))?,
            None => self.default_ams_net_id.ok_or_else(|| {
                DispatchError::InvalidParams(
                    "amsNetId is required (no default target configured)".to_string(),
                )
            })?,
        };
        let port = match u64_param(params, "port")? {
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| DispatchError::InvalidParams(format!("invalid port {port}")))?,
            None => self.default_port,
        };
        Ok(Target::new(ams_net_id, port))
    }

    fn automation_args(
        &self,
        action: AutomationAction,
        params: &Map<String, Json>,
    ) -> Result<AutomationArgs, DispatchError> {
        let mut args: AutomationArgs = serde_json::from_value(Json::Object(params.clone()))
            .map_err(|e| DispatchError::InvalidParams(e.to_string()))?;
        if args.ams_net_id.is_none()
            && matches!(action, AutomationAction::SetTarget | AutomationAction::Deploy)
        {
            args.ams_net_id = self.default_ams_net_id.map(|id| id.to_string());
        }
        args.validate(action)?;
        Ok(args)
    }
}

fn automation_action(command: Command) -> Result<AutomationAction, DispatchError> {
    let action = match command {
        Command::Build => AutomationAction::Build,
        Command::GetInfo => AutomationAction::Info,
        Command::Clean => AutomationAction::Clean,
        Command::SetTarget => AutomationAction::SetTarget,
        Command::Activate => AutomationAction::Activate,
        Command::Restart => AutomationAction::Restart,
        Command::Deploy => AutomationAction::Deploy,
        other => {
            return Err(DispatchError::Worker(format!(
                "'{other}' is not an automation command"
            )));
        }
    };
    Ok(action)
}

fn mode_result(mode: ControllerMode) -> OperationResult {
    OperationResult {
        value: Some(mode.to_string()),
        data: Some(json!({
            "mode": mode.to_string(),
            "code": mode.code(),
            "running": mode == ControllerMode::Run,
        })),
        ..OperationResult::ok()
    }
}

// ── Parameter helpers ───────────────────────────────────────────────────

fn optional_str<'p>(params: &'p Map<String, Json>, key: &str) -> Result<Option<&'p str>, DispatchError> {
    match params.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(DispatchError::InvalidParams(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

fn required_str<'p>(params: &'p Map<String, Json>, key: &str) -> Result<&'p str, DispatchError> {
    optional_str(params, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| DispatchError::InvalidParams(format!("{key} is required")))
}

fn u64_param(params: &Map<String, Json>, key: &str) -> Result<Option<u64>, DispatchError> {
    match params.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            DispatchError::InvalidParams(format!("{key} must be a non-negative integer, got {n}"))
        }),
        Some(other) => Err(DispatchError::InvalidParams(format!(
            "{key} must be an integer, got {other}"
        ))),
    }
}

/// Write values arrive as text; numbers and booleans are accepted for convenience.
fn value_param(params: &Map<String, Json>, key: &str) -> Result<String, DispatchError> {
    match params.get(key) {
        Some(Json::String(s)) => Ok(s.clone()),
        Some(Json::Number(n)) => Ok(n.to_string()),
        Some(Json::Bool(true)) => Ok("TRUE".to_string()),
        Some(Json::Bool(false)) => Ok("FALSE".to_string()),
        None | Some(Json::Null) => Err(DispatchError::InvalidParams(format!("{key} is required"))),
        Some(other) => Err(DispatchError::InvalidParams(format!(
            "{key} must be a string, number or boolean, got {other}"
        ))),
    }
}
