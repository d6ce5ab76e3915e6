#![deny(unsafe_code)]

//! plcwarden core runtime.
//!
//! Safe variable access and command dispatch for an industrial controller.
//! Reads and writes go through a scoped protocol session and a state guard;
//! dangerous commands are gated behind a time-boxed arm window and, for the
//! most destructive ones, an explicit confirmation token. The daemon exposes
//! the dispatcher to the CLI and to automated callers over a Unix socket.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future. The return type for async
/// trait methods consumed through `dyn Trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Audit trail layer and reader.
pub mod audit;
/// External automation tool backend (build, activate, deploy).
pub mod automation;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Command names and the dangerous-command table.
pub mod commands;
/// Confirmation token check.
pub mod confirm;
/// Async daemon runtime.
pub mod daemon;
/// Serialised command dispatch through the arm gate.
pub mod dispatch;
/// Time-boxed authorization window.
pub mod gate;
/// Controller state guard.
pub mod guard;
/// Daemon IPC over a Unix domain socket.
pub mod ipc;
/// Type table and value conversion.
pub mod marshal;
/// Controller protocol abstraction, sessions, handle scopes and the simulator.
pub mod protocol;
/// Uniform operation results and error kinds.
pub mod result;
/// Guarded variable reads and writes.
pub mod variables;

pub use audit::{AUDIT_TARGET, AuditEntry, AuditLog, AuditReader};
pub use automation::{AutomationAction, AutomationArgs, AutomationTool, Deployer};
pub use commands::{Command, DangerousCommandSpec};
pub use daemon::Daemon;
pub use dispatch::{CommandRequest, Dispatcher};
pub use gate::{ArmGate, ArmStatus, Clock, SystemClock};
pub use protocol::{AmsNetId, ControllerMode, SimulatedController, Target};
pub use result::{ErrorKind, OperationResult};
pub use variables::VariableService;
