//! Device protocol boundary.
//!
//! The wire protocol itself (framing, routing, transport) lives outside this
//! crate. What it needs from a client is captured by [`ProtocolClient`]: read
//! and write raw bytes through a handle, create and delete handles, resolve a
//! symbol, and report the controller's operating mode. A [`Connector`] opens
//! one such client per [`Target`].
//!
//! ```text
//! Connector ──connect(target)──▶ Box<dyn ProtocolClient>
//!                                     │ owned by
//!                                     ▼
//!                                  Session ──▶ HandleScope (one symbol)
//! ```

pub mod session;
pub mod sim;

use std::fmt;
use std::str::FromStr;

use plcwarden_config::CONTROLLER_MODES;
use serde::{Deserialize, Serialize};

use crate::result::{ErrorKind, HasErrorKind};

pub use session::{HandleScope, Session, with_handle};
pub use sim::{SimCall, SimStats, SimulatedController};

/// Device error codes this crate names explicitly.
pub mod codes {
    /// Target port not found on the router.
    pub const TARGET_PORT_NOT_FOUND: u32 = 0x6;
    /// Target machine not reachable through the router.
    pub const TARGET_MACHINE_NOT_FOUND: u32 = 0x7;
    /// Parameter size not correct.
    pub const INVALID_SIZE: u32 = 0x705;
    /// Object not found (e.g. unknown handle).
    pub const NOT_FOUND: u32 = 0x70C;
    /// Symbol not found.
    pub const SYMBOL_NOT_FOUND: u32 = 0x710;
    /// Server is in an invalid state.
    pub const INVALID_STATE: u32 = 0x712;
    /// Request timed out.
    pub const TIMEOUT: u32 = 0x745;

    /// Short description for the codes above.
    pub fn describe(code: u32) -> &'static str {
        match code {
            TARGET_PORT_NOT_FOUND => "target port not found",
            TARGET_MACHINE_NOT_FOUND => "target machine not found",
            INVALID_SIZE => "parameter size not correct",
            NOT_FOUND => "not found",
            SYMBOL_NOT_FOUND => "symbol not found",
            INVALID_STATE => "server is in invalid state",
            TIMEOUT => "timeout",
            _ => "device error",
        }
    }
}

/// Transport-level and device-reported failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection to {target} failed: {message} (device error {code:#x})")]
    Connection {
        target: String,
        code: u32,
        message: String,
    },

    #[error("handle operation on '{path}' failed: {message} (device error {code:#x})")]
    Handle {
        path: String,
        code: u32,
        message: String,
    },

    #[error("device error {code:#x}: {message}")]
    Device { code: u32, message: String },
}

impl ProtocolError {
    /// Build a [`ProtocolError::Device`] with the standard description for `code`.
    pub fn device(code: u32) -> Self {
        ProtocolError::Device {
            code,
            message: codes::describe(code).to_string(),
        }
    }

    /// The underlying device error code.
    pub fn code(&self) -> u32 {
        match self {
            ProtocolError::Connection { code, .. }
            | ProtocolError::Handle { code, .. }
            | ProtocolError::Device { code, .. } => *code,
        }
    }
}

impl HasErrorKind for ProtocolError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Connection { .. } => ErrorKind::Connection,
            ProtocolError::Handle { .. } => ErrorKind::Handle,
            ProtocolError::Device { .. } => ErrorKind::Protocol,
        }
    }
}

// ── Addressing ──────────────────────────────────────────────────────────

/// A six-octet AMS Net ID, e.g. `5.22.157.86.1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmsNetId([u8; 6]);

impl AmsNetId {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

/// Error returned when parsing an [`AmsNetId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid AMS Net ID {0:?}: expected six dot-separated octets")]
pub struct AmsNetIdParseError(pub String);

impl FromStr for AmsNetId {
    type Err = AmsNetIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split('.');
        for octet in &mut octets {
            *octet = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| AmsNetIdParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AmsNetIdParseError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}.{b}.{c}.{d}.{e}.{g}")
    }
}

impl Serialize for AmsNetId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AmsNetId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Controller address and runtime port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub ams_net_id: AmsNetId,
    pub port: u16,
}

impl Target {
    pub fn new(ams_net_id: AmsNetId, port: u16) -> Self {
        Self { ams_net_id, port }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ams_net_id, self.port)
    }
}

// ── Controller state ────────────────────────────────────────────────────

/// Coarse operating state reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerMode {
    Invalid,
    Idle,
    Reset,
    Init,
    Start,
    Run,
    Stop,
    SaveConfig,
    LoadConfig,
    PowerFailure,
    PowerGood,
    Error,
    Shutdown,
    Suspend,
    Resume,
    Config,
    Reconfig,
    Stopping,
    Incompatible,
    Exception,
}

impl ControllerMode {
    /// Map a device state code. Unknown codes are reported as `Invalid`.
    pub fn from_code(code: u16) -> Self {
        use ControllerMode::*;
        match code {
            1 => Idle,
            2 => Reset,
            3 => Init,
            4 => Start,
            5 => Run,
            6 => Stop,
            7 => SaveConfig,
            8 => LoadConfig,
            9 => PowerFailure,
            10 => PowerGood,
            11 => Error,
            12 => Shutdown,
            13 => Suspend,
            14 => Resume,
            15 => Config,
            16 => Reconfig,
            17 => Stopping,
            18 => Incompatible,
            19 => Exception,
            _ => Invalid,
        }
    }

    /// The device state code.
    pub fn code(self) -> u16 {
        use ControllerMode::*;
        match self {
            Invalid => 0,
            Idle => 1,
            Reset => 2,
            Init => 3,
            Start => 4,
            Run => 5,
            Stop => 6,
            SaveConfig => 7,
            LoadConfig => 8,
            PowerFailure => 9,
            PowerGood => 10,
            Error => 11,
            Shutdown => 12,
            Suspend => 13,
            Resume => 14,
            Config => 15,
            Reconfig => 16,
            Stopping => 17,
            Incompatible => 18,
            Exception => 19,
        }
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for ControllerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        CONTROLLER_MODES
            .iter()
            .position(|name| *name == lower)
            .map(|code| Self::from_code(code as u16))
            .ok_or_else(|| format!("unknown controller mode {s:?}"))
    }
}

// ── Symbols and handles ─────────────────────────────────────────────────

/// A symbol resolved from the controller's symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDescriptor {
    /// Symbolic path as reported by the controller.
    pub path: String,
    /// Declared type name (e.g. `DINT`, `STRING(80)`, `ST_Motor`).
    pub type_name: String,
    /// Size in bytes.
    pub size: usize,
}

/// Opaque controller-issued handle bound to one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ── Client traits ───────────────────────────────────────────────────────

/// One live connection to one controller.
///
/// Every method is a blocking call bounded only by the transport's own
/// timeout. Implementations must not retry internally.
pub trait ProtocolClient: Send {
    /// Report the controller's current operating mode.
    fn query_mode(&mut self) -> Result<ControllerMode, ProtocolError>;

    /// Resolve a symbolic path to its descriptor.
    fn resolve_symbol(&mut self, path: &str) -> Result<SymbolDescriptor, ProtocolError>;

    /// Acquire a handle for a symbolic path.
    fn create_handle(&mut self, path: &str) -> Result<Handle, ProtocolError>;

    /// Release a handle.
    fn delete_handle(&mut self, handle: Handle) -> Result<(), ProtocolError>;

    /// Read exactly `len` bytes through a handle.
    fn read_bytes(&mut self, handle: Handle, len: usize) -> Result<Vec<u8>, ProtocolError>;

    /// Write raw bytes through a handle.
    fn write_bytes(&mut self, handle: Handle, data: &[u8]) -> Result<(), ProtocolError>;

    /// Close the connection.
    fn close(&mut self) -> Result<(), ProtocolError>;
}

/// Opens [`ProtocolClient`] connections.
pub trait Connector: Send + Sync {
    /// Short backend name for status displays.
    fn name(&self) -> &str;

    /// Connect to `target`.
    fn connect(&self, target: &Target) -> Result<Box<dyn ProtocolClient>, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ams_net_id_parse_and_display() {
        let id: AmsNetId = "5.22.157.86.1.1".parse().unwrap();
        assert_eq!(id.octets(), [5, 22, 157, 86, 1, 1]);
        assert_eq!(id.to_string(), "5.22.157.86.1.1");
    }

    #[test]
    fn test_ams_net_id_rejects_short_and_long() {
        assert!("192.168.0.1".parse::<AmsNetId>().is_err());
        assert!("1.2.3.4.5.6.7".parse::<AmsNetId>().is_err());
        assert!("1.2.3.4.5.256".parse::<AmsNetId>().is_err());
        assert!("".parse::<AmsNetId>().is_err());
    }

    #[test]
    fn test_target_serializes_as_string_id() {
        let target = Target::new("10.0.0.5.1.1".parse().unwrap(), 851);
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json, serde_json::json!({"amsNetId": "10.0.0.5.1.1", "port": 851}));
        assert_eq!(target.to_string(), "10.0.0.5.1.1:851");
    }

    #[test]
    fn test_controller_mode_codes() {
        assert_eq!(ControllerMode::from_code(5), ControllerMode::Run);
        assert_eq!(ControllerMode::from_code(15), ControllerMode::Config);
        assert_eq!(ControllerMode::from_code(999), ControllerMode::Invalid);
        for code in 0..20 {
            assert_eq!(ControllerMode::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_controller_mode_from_str() {
        assert_eq!("RUN".parse::<ControllerMode>(), Ok(ControllerMode::Run));
        assert_eq!("config".parse::<ControllerMode>(), Ok(ControllerMode::Config));
        assert!("warp".parse::<ControllerMode>().is_err());
    }

    #[test]
    fn test_every_mode_name_parses_to_its_code() {
        for (code, name) in CONTROLLER_MODES.iter().enumerate() {
            let mode: ControllerMode = name.parse().unwrap();
            assert_eq!(mode.code() as usize, code);
            assert_eq!(mode.to_string().to_ascii_lowercase(), *name);
        }
        assert_eq!("Stopping".parse::<ControllerMode>(), Ok(ControllerMode::Stopping));
    }

    #[test]
    fn test_protocol_error_kinds() {
        let conn = ProtocolError::Connection {
            target: "1.2.3.4.5.6:851".to_string(),
            code: codes::TARGET_MACHINE_NOT_FOUND,
            message: "unreachable".to_string(),
        };
        assert_eq!(conn.kind(), ErrorKind::Connection);
        assert_eq!(conn.code(), 0x7);
        assert!(conn.to_string().contains("0x7"));

        let device = ProtocolError::device(codes::SYMBOL_NOT_FOUND);
        assert_eq!(device.kind(), ErrorKind::Protocol);
        assert!(device.to_string().contains("symbol not found"));
    }
}
