//! Typed variable reads and writes.
//!
//! Each operation opens its own [`Session`], resolves the symbol, checks that
//! the controller is in `Run`, and only then opens a [`HandleScope`]. The
//! steps are strictly sequential; nothing is cached between operations.
//!
//! These calls block on the protocol client. Async callers go through
//! [`crate::dispatch::Dispatcher`], which runs them on the blocking pool.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::AUDIT_TARGET;
use crate::guard::{self, GuardError, StateError};
use crate::marshal::{self, MarshalError, Value};
use crate::protocol::{
    Connector, ControllerMode, ProtocolError, Session, SymbolDescriptor, Target, with_handle,
};
use crate::result::{ErrorKind, HasErrorKind, OperationResult};

/// Failure of a variable access.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

impl From<GuardError> for AccessError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::State(e) => AccessError::State(e),
            GuardError::Protocol(e) => AccessError::Protocol(e),
        }
    }
}

impl HasErrorKind for AccessError {
    fn kind(&self) -> ErrorKind {
        match self {
            AccessError::Protocol(e) => e.kind(),
            AccessError::State(e) => e.kind(),
            AccessError::Marshal(e) => e.kind(),
        }
    }
}

/// A decoded read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub descriptor: SymbolDescriptor,
    pub value: Value,
}

/// A completed write with the values observed around it.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub descriptor: SymbolDescriptor,
    pub previous: Value,
    pub new: Value,
    /// Whether the bytes read back equal the bytes written.
    pub confirmed: bool,
}

/// Read one symbol on an open session.
pub fn read_in_session(session: &mut Session, path: &str) -> Result<ReadOutcome, AccessError> {
    let descriptor = session.resolve(path)?;
    guard::require_mode(session, ControllerMode::Run)?;

    let entry = marshal::lookup(&descriptor.type_name);
    let bytes = with_handle(session, &descriptor, |scope| {
        scope.read(descriptor.size).map_err(AccessError::from)
    })?;
    let value = entry
        .decode(&bytes)
        .map_err(|e| e.with_type_name(&descriptor.type_name))?;

    debug!(path = %descriptor.path, type_name = %descriptor.type_name, %value, "Variable read");
    Ok(ReadOutcome { descriptor, value })
}

/// Write one symbol on an open session: read, write, read back.
pub fn write_in_session(
    session: &mut Session,
    path: &str,
    text: &str,
) -> Result<WriteOutcome, AccessError> {
    let descriptor = session.resolve(path)?;
    guard::require_mode(session, ControllerMode::Run)?;

    let entry = marshal::lookup(&descriptor.type_name);
    let encoded = entry
        .encode(text, descriptor.size)
        .map_err(|e| e.with_type_name(&descriptor.type_name))?;

    let (before, after) = with_handle(session, &descriptor, |scope| {
        let before = scope.read(descriptor.size)?;
        scope.write(&encoded)?;
        let after = scope.read(descriptor.size)?;
        Ok::<_, AccessError>((before, after))
    })?;

    let decode = |bytes: &[u8]| {
        entry
            .decode(bytes)
            .map_err(|e| e.with_type_name(&descriptor.type_name))
    };
    let previous = decode(&before)?;
    let new = decode(&after)?;
    let confirmed = after.get(..encoded.len()) == Some(encoded.as_slice());

    info!(
        target: AUDIT_TARGET,
        event = "variable_written",
        path = %descriptor.path,
        type_name = %descriptor.type_name,
        previous = %previous,
        new = %new,
        "Variable written"
    );
    if !confirmed {
        warn!(
            path = %descriptor.path,
            requested = text,
            new = %new,
            "Value read back after write differs from the value requested"
        );
    }

    Ok(WriteOutcome {
        descriptor,
        previous,
        new,
        confirmed,
    })
}

/// Connects per operation and converts every outcome into an [`OperationResult`].
#[derive(Clone)]
pub struct VariableService {
    connector: Arc<dyn Connector>,
}

impl VariableService {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }

    pub fn try_read(&self, target: &Target, path: &str) -> Result<ReadOutcome, AccessError> {
        let mut session = Session::connect(self.connector.as_ref(), target)?;
        read_in_session(&mut session, path)
    }

    pub fn try_write(
        &self,
        target: &Target,
        path: &str,
        text: &str,
    ) -> Result<WriteOutcome, AccessError> {
        let mut session = Session::connect(self.connector.as_ref(), target)?;
        write_in_session(&mut session, path, text)
    }

    /// Read `path` and report the decoded value and its declared type.
    pub fn read_variable(&self, target: &Target, path: &str) -> OperationResult {
        match self.try_read(target, path) {
            Ok(outcome) => OperationResult {
                success: true,
                value: Some(outcome.value.to_string()),
                data_type: Some(outcome.descriptor.type_name),
                size_bytes: Some(outcome.descriptor.size),
                ..OperationResult::default()
            },
            Err(err) => {
                warn!(%target, path, error = %err, "Variable read failed");
                OperationResult::from_error(&err)
            }
        }
    }

    /// Write `text` to `path` and report the values before and after.
    pub fn write_variable(&self, target: &Target, path: &str, text: &str) -> OperationResult {
        match self.try_write(target, path, text) {
            Ok(outcome) => OperationResult {
                success: true,
                previous_value: Some(outcome.previous.to_string()),
                new_value: Some(outcome.new.to_string()),
                data_type: Some(outcome.descriptor.type_name),
                size_bytes: Some(outcome.descriptor.size),
                ..OperationResult::default()
            },
            Err(err) => {
                warn!(%target, path, error = %err, "Variable write failed");
                OperationResult::from_error(&err)
            }
        }
    }

    /// Report the controller's current mode.
    pub fn controller_mode(&self, target: &Target) -> Result<ControllerMode, ProtocolError> {
        let mut session = Session::connect(self.connector.as_ref(), target)?;
        session.query_mode()
    }
}
