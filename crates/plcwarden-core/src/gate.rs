//! Time-windowed authorization gate.
//!
//! The gate is `Disarmed` at start-up. `arm` opens a window of `ttl` seconds
//! and `disarm` closes it at once. Expiry is lazy: every access takes the
//! same lock, compares the clock against the window, and flips the gate to
//! disarmed before answering. There is no background timer.
//!
//! A poisoned lock is treated as disarmed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use plcwarden_config::GateConfig;

use crate::audit::AUDIT_TARGET;
use crate::result::{ErrorKind, HasErrorKind};

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Snapshot of the gate as seen by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStatus {
    pub armed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

impl ArmStatus {
    pub const DISARMED: ArmStatus = ArmStatus {
        armed: false,
        expires_in_seconds: None,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("arm TTL must be between 1 and {max} seconds, got {requested}")]
    InvalidTtl { requested: u64, max: u64 },
}

impl HasErrorKind for GateError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidRequest
    }
}

#[derive(Debug)]
struct ArmState {
    armed: bool,
    armed_at: Instant,
    ttl: Duration,
}

impl ArmState {
    /// Apply lazy expiry. Returns `true` when this call performed the transition.
    fn expire(&mut self, now: Instant) -> bool {
        if self.armed && now.saturating_duration_since(self.armed_at) >= self.ttl {
            self.armed = false;
            return true;
        }
        false
    }

    fn status(&self, now: Instant) -> ArmStatus {
        if !self.armed {
            return ArmStatus::DISARMED;
        }
        let remaining = self
            .ttl
            .saturating_sub(now.saturating_duration_since(self.armed_at));
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        ArmStatus {
            armed: true,
            expires_in_seconds: Some(secs),
        }
    }
}

/// Process-wide arm state behind a single lock.
pub struct ArmGate {
    state: Mutex<ArmState>,
    default_ttl: Duration,
    max_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ArmGate {
    /// A disarmed gate on the system clock.
    pub fn new(default_ttl: Duration, max_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, max_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, max_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(ArmState {
                armed: false,
                armed_at: now,
                ttl: default_ttl,
            }),
            default_ttl,
            max_ttl: max_ttl.max(default_ttl),
            clock,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            Duration::from_secs(config.arm_ttl_secs),
            Duration::from_secs(config.max_ttl_secs),
        )
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Arm for `ttl_secs`, or for the configured default. Re-arming restarts the window.
    pub fn arm(&self, ttl_secs: Option<u64>) -> Result<ArmStatus, GateError> {
        let ttl = match ttl_secs {
            None => self.default_ttl,
            Some(secs) if secs == 0 || secs > self.max_ttl.as_secs() => {
                return Err(GateError::InvalidTtl {
                    requested: secs,
                    max: self.max_ttl.as_secs(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
        };

        let mut state = self.lock();
        let now = self.clock.now();
        state.armed = true;
        state.armed_at = now;
        state.ttl = ttl;
        info!(target: AUDIT_TARGET, event = "armed", ttl_secs = ttl.as_secs(), "Gate armed");
        Ok(state.status(now))
    }

    /// Disarm unconditionally.
    pub fn disarm(&self) -> ArmStatus {
        let mut state = self.lock();
        let was_armed = state.armed;
        state.armed = false;
        info!(target: AUDIT_TARGET, event = "disarmed", was_armed, "Gate disarmed");
        ArmStatus::DISARMED
    }

    /// Whether the gate is armed, after applying expiry.
    pub fn check_armed(&self) -> bool {
        self.status().armed
    }

    /// Current state, after applying expiry.
    pub fn status(&self) -> ArmStatus {
        let mut state = self.lock();
        let now = self.clock.now();
        if state.expire(now) {
            info!(
                target: AUDIT_TARGET,
                event = "expired",
                ttl_secs = state.ttl.as_secs(),
                "Gate expired"
            );
        }
        state.status(now)
    }

    fn lock(&self) -> MutexGuard<'_, ArmState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.armed = false;
                self.state.clear_poison();
                warn!(target: AUDIT_TARGET, event = "poisoned", "Gate lock poisoned, forcing disarm");
                guard
            }
        }
    }
}
