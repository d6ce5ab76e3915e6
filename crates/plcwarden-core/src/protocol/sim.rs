//! In-memory controller.
//!
//! [`SimulatedController`] implements [`Connector`] over a shared symbol
//! table. The daemon serves from it when `[simulator] enabled = true`, and
//! the test suites use it to observe handle hygiene and operation ordering
//! through [`SimulatedController::stats`] and [`SimulatedController::calls`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use plcwarden_config::SimulatorConfig;

use super::{
    Connector, ControllerMode, Handle, ProtocolClient, ProtocolError, SymbolDescriptor, Target,
    codes,
};
use crate::marshal::{self, MarshalError};

/// Counters of protocol operations seen by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub connects: usize,
    pub closes: usize,
    pub handle_creates: usize,
    pub handle_deletes: usize,
    pub reads: usize,
    pub writes: usize,
    pub mode_queries: usize,
}

/// Number of protocol calls the simulator remembers by default.
pub const DEFAULT_CALL_CAPACITY: usize = 1024;

/// One protocol call, in the order it reached the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Connect,
    QueryMode,
    Resolve(String),
    CreateHandle(String),
    DeleteHandle(u32),
    Read(u32),
    Write(u32),
    Close,
}

/// Errors building a simulator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SimConfigError {
    #[error("unknown simulator mode: {0}")]
    Mode(String),

    #[error("symbol '{path}': {source}")]
    Value {
        path: String,
        #[source]
        source: MarshalError,
    },

    #[error("symbol '{path}': size of type '{type_name}' is unknown, set `size`")]
    UnknownSize { path: String, type_name: String },
}

#[derive(Debug)]
struct SimSymbol {
    path: String,
    type_name: String,
    bytes: Vec<u8>,
    frozen: bool,
}

#[derive(Debug)]
struct SimState {
    mode: ControllerMode,
    offline: bool,
    fail_handle_deletion: bool,
    fail_writes: Option<u32>,
    symbols: HashMap<String, SimSymbol>,
    handles: HashMap<u32, String>,
    next_handle: u32,
    stats: SimStats,
    calls: VecDeque<SimCall>,
    call_capacity: usize,
}

impl SimState {
    /// Append to the call log, dropping the oldest entry when full.
    fn record(&mut self, call: SimCall) {
        if self.call_capacity == 0 {
            return;
        }
        if self.calls.len() >= self.call_capacity {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// A shareable in-memory controller. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// An empty controller in `Run` mode.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                mode: ControllerMode::Run,
                offline: false,
                fail_handle_deletion: false,
                fail_writes: None,
                symbols: HashMap::new(),
                handles: HashMap::new(),
                next_handle: 0x1000,
                stats: SimStats::default(),
                calls: VecDeque::new(),
                call_capacity: DEFAULT_CALL_CAPACITY,
            })),
        }
    }

    /// Build a controller from the `[simulator]` configuration section.
    pub fn from_config(config: &SimulatorConfig) -> Result<Self, SimConfigError> {
        let mode: ControllerMode = config
            .mode
            .parse()
            .map_err(|_| SimConfigError::Mode(config.mode.clone()))?;
        let sim = Self::new().with_mode(mode);

        for symbol in &config.symbols {
            let size = symbol
                .size
                .or_else(|| marshal::declared_size(&symbol.type_name))
                .ok_or_else(|| SimConfigError::UnknownSize {
                    path: symbol.path.clone(),
                    type_name: symbol.type_name.clone(),
                })?;
            let bytes = match &symbol.value {
                Some(text) => marshal::lookup(&symbol.type_name)
                    .encode(text, size)
                    .map_err(|source| SimConfigError::Value {
                        path: symbol.path.clone(),
                        source: source.with_type_name(&symbol.type_name),
                    })?,
                None => vec![0u8; size],
            };
            sim.insert(&symbol.path, &symbol.type_name, bytes);
        }
        Ok(sim)
    }

    /// Keep at most `capacity` recent calls; 0 turns the call log off.
    pub fn with_call_capacity(self, capacity: usize) -> Self {
        {
            let mut state = self.lock();
            state.call_capacity = capacity;
            while state.calls.len() > capacity {
                state.calls.pop_front();
            }
        }
        self
    }

    pub fn with_mode(self, mode: ControllerMode) -> Self {
        self.set_mode(mode);
        self
    }

    /// Add a symbol with raw initial bytes. The symbol size is `bytes.len()`.
    pub fn with_symbol(self, path: &str, type_name: &str, bytes: Vec<u8>) -> Self {
        self.insert(path, type_name, bytes);
        self
    }

    /// Add a symbol whose initial bytes are encoded from `text`.
    pub fn with_value(self, path: &str, type_name: &str, text: &str) -> Result<Self, MarshalError> {
        let entry = marshal::lookup(type_name);
        let size = marshal::declared_size(type_name).unwrap_or(0);
        let bytes = entry
            .encode(text, size)
            .map_err(|e| e.with_type_name(type_name))?;
        self.insert(path, type_name, bytes);
        Ok(self)
    }

    fn insert(&self, path: &str, type_name: &str, bytes: Vec<u8>) {
        self.lock().symbols.insert(
            path.to_ascii_lowercase(),
            SimSymbol {
                path: path.to_string(),
                type_name: type_name.to_string(),
                bytes,
                frozen: false,
            },
        );
    }

    pub fn set_mode(&self, mode: ControllerMode) {
        self.lock().mode = mode;
    }

    pub fn mode(&self) -> ControllerMode {
        self.lock().mode
    }

    /// Make every connect attempt fail as an unreachable target.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make every handle deletion fail.
    pub fn fail_handle_deletion(&self, fail: bool) {
        self.lock().fail_handle_deletion = fail;
    }

    /// Make every write fail with the given device code, or succeed again with `None`.
    pub fn fail_writes(&self, code: Option<u32>) {
        self.lock().fail_writes = code;
    }

    /// Accept writes to `path` without changing its value.
    pub fn freeze_symbol(&self, path: &str) {
        if let Some(symbol) = self.lock().symbols.get_mut(&path.to_ascii_lowercase()) {
            symbol.frozen = true;
        }
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    /// The most recent protocol calls, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.iter().cloned().collect()
    }

    /// Current bytes of a symbol.
    pub fn symbol_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .symbols
            .get(&path.to_ascii_lowercase())
            .map(|s| s.bytes.clone())
    }

    /// Number of handles created and not yet deleted.
    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // The state holds no invariants a panicking test could break halfway.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Connector for SimulatedController {
    fn name(&self) -> &str {
        "simulator"
    }

    fn connect(&self, target: &Target) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
        let mut state = self.lock();
        state.record(SimCall::Connect);
        if state.offline {
            return Err(ProtocolError::Connection {
                target: target.to_string(),
                code: codes::TARGET_MACHINE_NOT_FOUND,
                message: codes::describe(codes::TARGET_MACHINE_NOT_FOUND).to_string(),
            });
        }
        state.stats.connects += 1;
        Ok(Box::new(SimClient {
            controller: self.clone(),
        }))
    }
}

struct SimClient {
    controller: SimulatedController,
}

impl SimClient {
    fn handle_path(state: &SimState, handle: Handle) -> Result<String, ProtocolError> {
        state
            .handles
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| ProtocolError::device(codes::NOT_FOUND))
    }
}

impl ProtocolClient for SimClient {
    fn query_mode(&mut self) -> Result<ControllerMode, ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::QueryMode);
        state.stats.mode_queries += 1;
        Ok(state.mode)
    }

    fn resolve_symbol(&mut self, path: &str) -> Result<SymbolDescriptor, ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::Resolve(path.to_string()));
        state
            .symbols
            .get(&path.to_ascii_lowercase())
            .map(|s| SymbolDescriptor {
                path: s.path.clone(),
                type_name: s.type_name.clone(),
                size: s.bytes.len(),
            })
            .ok_or_else(|| ProtocolError::Handle {
                path: path.to_string(),
                code: codes::SYMBOL_NOT_FOUND,
                message: codes::describe(codes::SYMBOL_NOT_FOUND).to_string(),
            })
    }

    fn create_handle(&mut self, path: &str) -> Result<Handle, ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::CreateHandle(path.to_string()));
        let key = path.to_ascii_lowercase();
        if !state.symbols.contains_key(&key) {
            return Err(ProtocolError::Handle {
                path: path.to_string(),
                code: codes::SYMBOL_NOT_FOUND,
                message: codes::describe(codes::SYMBOL_NOT_FOUND).to_string(),
            });
        }
        let id = state.next_handle;
        state.next_handle = state.next_handle.wrapping_add(1);
        state.handles.insert(id, key);
        state.stats.handle_creates += 1;
        Ok(Handle(id))
    }

    fn delete_handle(&mut self, handle: Handle) -> Result<(), ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::DeleteHandle(handle.0));
        state.stats.handle_deletes += 1;
        let path = Self::handle_path(&state, handle)?;
        if state.fail_handle_deletion {
            return Err(ProtocolError::Handle {
                path,
                code: codes::INVALID_STATE,
                message: "handle release rejected".to_string(),
            });
        }
        state.handles.remove(&handle.0);
        Ok(())
    }

    fn read_bytes(&mut self, handle: Handle, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::Read(handle.0));
        state.stats.reads += 1;
        let key = Self::handle_path(&state, handle)?;
        let symbol = state
            .symbols
            .get(&key)
            .ok_or_else(|| ProtocolError::device(codes::SYMBOL_NOT_FOUND))?;
        if len > symbol.bytes.len() {
            return Err(ProtocolError::device(codes::INVALID_SIZE));
        }
        Ok(symbol.bytes[..len].to_vec())
    }

    fn write_bytes(&mut self, handle: Handle, data: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::Write(handle.0));
        state.stats.writes += 1;
        if let Some(code) = state.fail_writes {
            return Err(ProtocolError::device(code));
        }
        let key = Self::handle_path(&state, handle)?;
        let symbol = state
            .symbols
            .get_mut(&key)
            .ok_or_else(|| ProtocolError::device(codes::SYMBOL_NOT_FOUND))?;
        if data.len() > symbol.bytes.len() {
            return Err(ProtocolError::device(codes::INVALID_SIZE));
        }
        if !symbol.frozen {
            symbol.bytes[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.controller.lock();
        state.record(SimCall::Close);
        state.stats.closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plcwarden_config::SimulatedSymbolConfig;
    use pretty_assertions::assert_eq;

    fn target() -> Target {
        Target::new("10.0.0.1.1.1".parse().unwrap(), 851)
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let sim = SimulatedController::new().with_symbol("GVL.nCount", "DINT", vec![0; 4]);
        let mut client = sim.connect(&target()).unwrap();
        let desc = client.resolve_symbol("gvl.NCOUNT").unwrap();
        assert_eq!(desc.path, "GVL.nCount");
        assert_eq!(desc.size, 4);
    }

    #[test]
    fn test_offline_connect_fails() {
        let sim = SimulatedController::new();
        sim.set_offline(true);
        let err = sim.connect(&target()).err().unwrap();
        assert!(matches!(err, ProtocolError::Connection { code: 0x7, .. }));
        assert_eq!(sim.stats().connects, 0);
    }

    #[test]
    fn test_write_then_read() {
        let sim = SimulatedController::new()
            .with_value("GVL.nCount", "DINT", "5")
            .unwrap();
        let mut client = sim.connect(&target()).unwrap();
        let h = client.create_handle("GVL.nCount").unwrap();
        client.write_bytes(h, &9i32.to_le_bytes()).unwrap();
        assert_eq!(client.read_bytes(h, 4).unwrap(), 9i32.to_le_bytes());
        client.delete_handle(h).unwrap();
        assert_eq!(sim.open_handles(), 0);
    }

    #[test]
    fn test_frozen_symbol_ignores_writes() {
        let sim = SimulatedController::new().with_symbol("GVL.nLimit", "INT", vec![10, 0]);
        sim.freeze_symbol("GVL.nLimit");
        let mut client = sim.connect(&target()).unwrap();
        let h = client.create_handle("GVL.nLimit").unwrap();
        client.write_bytes(h, &[99, 0]).unwrap();
        assert_eq!(sim.symbol_bytes("GVL.nLimit"), Some(vec![10, 0]));
    }

    #[test]
    fn test_stale_handle_is_not_found() {
        let sim = SimulatedController::new().with_symbol("X", "BYTE", vec![1]);
        let mut client = sim.connect(&target()).unwrap();
        let err = client.read_bytes(Handle(1), 1).unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
    }

    #[test]
    fn test_from_config() {
        let config = SimulatorConfig {
            enabled: true,
            mode: "config".to_string(),
            symbols: vec![
                SimulatedSymbolConfig {
                    path: "MAIN.bRunning".to_string(),
                    type_name: "BOOL".to_string(),
                    value: Some("TRUE".to_string()),
                    size: None,
                },
                SimulatedSymbolConfig {
                    path: "GVL.sName".to_string(),
                    type_name: "STRING(10)".to_string(),
                    value: Some("abc".to_string()),
                    size: None,
                },
                SimulatedSymbolConfig {
                    path: "GVL.stMotor".to_string(),
                    type_name: "ST_Motor".to_string(),
                    value: None,
                    size: Some(6),
                },
            ],
        };
        let sim = SimulatedController::from_config(&config).unwrap();
        assert_eq!(sim.mode(), ControllerMode::Config);
        assert_eq!(sim.symbol_bytes("MAIN.bRunning"), Some(vec![1]));
        assert_eq!(sim.symbol_bytes("GVL.sName").map(|b| b.len()), Some(11));
        assert_eq!(sim.symbol_bytes("GVL.stMotor"), Some(vec![0; 6]));
    }

    #[test]
    fn test_from_config_transitional_mode() {
        let config = SimulatorConfig {
            enabled: true,
            mode: "Stopping".to_string(),
            symbols: Vec::new(),
        };
        let sim = SimulatedController::from_config(&config).unwrap();
        assert_eq!(sim.mode(), ControllerMode::Stopping);
    }

    #[test]
    fn test_from_config_requires_size_for_composites() {
        let config = SimulatorConfig {
            enabled: true,
            mode: "run".to_string(),
            symbols: vec![SimulatedSymbolConfig {
                path: "GVL.stMotor".to_string(),
                type_name: "ST_Motor".to_string(),
                value: None,
                size: None,
            }],
        };
        let err = SimulatedController::from_config(&config).unwrap_err();
        assert!(matches!(err, SimConfigError::UnknownSize { .. }));
    }

    #[test]
    fn test_call_log_keeps_only_the_newest_calls() {
        let sim = SimulatedController::new()
            .with_symbol("X", "BYTE", vec![1])
            .with_call_capacity(3);
        for _ in 0..100 {
            let mut client = sim.connect(&target()).unwrap();
            client.query_mode().unwrap();
            client.close().unwrap();
        }
        assert_eq!(
            sim.calls(),
            vec![SimCall::Connect, SimCall::QueryMode, SimCall::Close]
        );
        assert_eq!(sim.stats().connects, 100);

        let quiet = SimulatedController::new().with_call_capacity(0);
        quiet.connect(&target()).unwrap().close().unwrap();
        assert!(quiet.calls().is_empty());
        assert_eq!(quiet.stats().closes, 1);
    }

    #[test]
    fn test_calls_are_recorded_in_order() {
        let sim = SimulatedController::new().with_symbol("X", "BYTE", vec![1]);
        let mut client = sim.connect(&target()).unwrap();
        client.query_mode().unwrap();
        let h = client.create_handle("X").unwrap();
        client.read_bytes(h, 1).unwrap();
        client.delete_handle(h).unwrap();
        client.close().unwrap();
        assert_eq!(
            sim.calls(),
            vec![
                SimCall::Connect,
                SimCall::QueryMode,
                SimCall::CreateHandle("X".to_string()),
                SimCall::Read(h.0),
                SimCall::DeleteHandle(h.0),
                SimCall::Close,
            ]
        );
    }
}
