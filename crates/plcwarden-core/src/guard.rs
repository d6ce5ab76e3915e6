//! Controller state precondition for variable access.

use tracing::debug;

use crate::protocol::{ControllerMode, ProtocolError, Session};
use crate::result::{ErrorKind, HasErrorKind};

/// The controller reported a mode other than the one required.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("controller is not running (reported mode: {actual}, required: {expected})")]
pub struct StateError {
    pub expected: ControllerMode,
    pub actual: ControllerMode,
}

impl HasErrorKind for StateError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::State
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HasErrorKind for GuardError {
    fn kind(&self) -> ErrorKind {
        match self {
            GuardError::State(e) => e.kind(),
            GuardError::Protocol(e) => e.kind(),
        }
    }
}

/// Query the controller's mode and fail unless it equals `expected`.
///
/// Called once per operation, after symbol resolution and before any handle
/// exists. The result is never cached.
pub fn require_mode(
    session: &mut Session,
    expected: ControllerMode,
) -> Result<ControllerMode, GuardError> {
    let actual = session.query_mode()?;
    if actual != expected {
        debug!(target = %session.target(), %actual, %expected, "State guard rejected access");
        return Err(StateError { expected, actual }.into());
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SimCall, SimulatedController, Target};

    fn session(sim: &SimulatedController) -> Session {
        Session::connect(sim, &Target::new("1.2.3.4.1.1".parse().unwrap(), 851)).unwrap()
    }

    #[test]
    fn test_run_mode_passes() {
        let sim = SimulatedController::new();
        let mut s = session(&sim);
        assert_eq!(require_mode(&mut s, ControllerMode::Run).unwrap(), ControllerMode::Run);
    }

    #[test]
    fn test_config_mode_is_rejected() {
        let sim = SimulatedController::new().with_mode(ControllerMode::Config);
        let mut s = session(&sim);
        let err = require_mode(&mut s, ControllerMode::Run).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        let msg = err.to_string();
        assert!(msg.contains("not running"));
        assert!(msg.contains("Config"));
    }

    #[test]
    fn test_mode_is_queried_every_time() {
        let sim = SimulatedController::new();
        let mut s = session(&sim);
        require_mode(&mut s, ControllerMode::Run).unwrap();
        sim.set_mode(ControllerMode::Stop);
        assert!(require_mode(&mut s, ControllerMode::Run).is_err());
        let queries = sim
            .calls()
            .into_iter()
            .filter(|c| *c == SimCall::QueryMode)
            .count();
        assert_eq!(queries, 2);
    }
}
