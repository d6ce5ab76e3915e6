//! Structured results returned across every public boundary.
//!
//! Each failure carries both a human-readable message and an [`ErrorKind`]
//! so an automated caller can pick a corrective action (arm, confirm, wait
//! for the controller to enter Run, fix the value) without parsing text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure taxonomy, serialized with the names the caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ConnectionError")]
    Connection,
    #[serde(rename = "StateError")]
    State,
    #[serde(rename = "NotArmedError")]
    NotArmed,
    #[serde(rename = "ConfirmationError")]
    Confirmation,
    #[serde(rename = "UnsupportedTypeError")]
    UnsupportedType,
    #[serde(rename = "UnsupportedValueError")]
    UnsupportedValue,
    #[serde(rename = "HandleError")]
    Handle,
    #[serde(rename = "ProtocolError")]
    Protocol,
    #[serde(rename = "InvalidRequestError")]
    InvalidRequest,
    #[serde(rename = "AutomationError")]
    Automation,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    /// The serialized name, e.g. `"NotArmedError"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::State => "StateError",
            ErrorKind::NotArmed => "NotArmedError",
            ErrorKind::Confirmation => "ConfirmationError",
            ErrorKind::UnsupportedType => "UnsupportedTypeError",
            ErrorKind::UnsupportedValue => "UnsupportedValueError",
            ErrorKind::Handle => "HandleError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::Automation => "AutomationError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error type that can reach a public boundary.
pub trait HasErrorKind: std::error::Error {
    fn kind(&self) -> ErrorKind;
}

/// Result object returned by every public operation.
///
/// Only the fields relevant to the operation are populated; absent fields are
/// omitted from the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,

    /// Decoded value (reads).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Declared type of the symbol (reads and writes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    /// Size of the symbol in bytes (reads and writes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<usize>,

    /// Value read immediately before a write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<String>,

    /// Value read back immediately after a write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,

    /// Command-specific payload (gate status, automation output, mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl OperationResult {
    /// A successful result with no fields set.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A successful result carrying a command-specific payload.
    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    /// A failed result.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            ..Self::default()
        }
    }

    /// Convert an error into a failed result.
    pub fn from_error<E: HasErrorKind + ?Sized>(err: &E) -> Self {
        Self::failure(err.kind(), err.to_string())
    }
}
