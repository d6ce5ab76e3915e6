//! Second-factor confirmation for the most destructive commands.
//!
//! The check is a pure comparison. It never touches the arm gate, so a
//! failed confirmation can be retried inside the same armed window.

use crate::commands::DangerousCommandSpec;
use crate::result::{ErrorKind, HasErrorKind};

/// The only accepted acknowledgment. Compared byte for byte.
pub const CONFIRMATION_TOKEN: &str = "CONFIRM";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error("command '{command}' requires confirmation: pass confirm=\"CONFIRM\"")]
    Missing { command: String },

    #[error("confirmation for '{command}' rejected: expected exactly \"CONFIRM\"")]
    Mismatch { command: String },
}

impl HasErrorKind for ConfirmationError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Confirmation
    }
}

pub fn check_confirmation(
    command: &str,
    spec: &DangerousCommandSpec,
    supplied: Option<&str>,
) -> Result<(), ConfirmationError> {
    if !spec.requires_confirm {
        return Ok(());
    }
    match supplied {
        Some(token) if token.as_bytes() == CONFIRMATION_TOKEN.as_bytes() => Ok(()),
        Some(_) => Err(ConfirmationError::Mismatch {
            command: command.to_string(),
        }),
        None => Err(ConfirmationError::Missing {
            command: command.to_string(),
        }),
    }
}
