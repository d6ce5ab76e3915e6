//! Controller, clock and deployer fixtures.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use plcwarden_core::automation::{AutomationAction, AutomationArgs, AutomationError, Deployer};
use plcwarden_core::gate::Clock;
use plcwarden_core::protocol::{AmsNetId, SimulatedController, Target};
use plcwarden_core::BoxFuture;

/// AMS Net ID used by [`demo_target`].
pub const DEMO_AMS_NET_ID: &str = "5.22.157.86.1.1";

/// PLC runtime port used by [`demo_target`].
pub const DEMO_PORT: u16 = 851;

/// Address of the demo controller.
pub fn demo_target() -> Target {
    let id: AmsNetId = DEMO_AMS_NET_ID.parse().expect("demo AMS Net ID parses");
    Target::new(id, DEMO_PORT)
}

/// A running controller with a small symbol table:
///
/// | path            | type        | initial value |
/// |-----------------|-------------|---------------|
/// | `MAIN.bRunning` | BOOL        | FALSE         |
/// | `GVL.nCount`    | DINT        | 42            |
/// | `GVL.fTemp`     | REAL        | 21.5          |
/// | `GVL.sName`     | STRING(80)  | pump-1        |
/// | `GVL.stMotor`   | ST_Motor    | 24 zero bytes |
pub fn demo_controller() -> SimulatedController {
    SimulatedController::new()
        .with_value("MAIN.bRunning", "BOOL", "FALSE")
        .and_then(|c| c.with_value("GVL.nCount", "DINT", "42"))
        .and_then(|c| c.with_value("GVL.fTemp", "REAL", "21.5"))
        .and_then(|c| c.with_value("GVL.sName", "STRING(80)", "pump-1"))
        .expect("demo symbols encode")
        .with_symbol("GVL.stMotor", "ST_Motor", vec![0; 24])
}

/// A [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().expect("clock lock") += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().expect("clock lock")
    }
}

/// A [`Deployer`] that records every call and answers with a fixed payload.
#[derive(Debug, Clone)]
pub struct RecordingDeployer {
    calls: Arc<Mutex<Vec<(AutomationAction, AutomationArgs)>>>,
    payload: serde_json::Value,
    delay: Duration,
}

impl RecordingDeployer {
    /// Answers `{"success": true}` immediately.
    pub fn new() -> Self {
        Self::with_payload(serde_json::json!({"success": true}))
    }

    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            payload,
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(AutomationAction, AutomationArgs)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn actions(&self) -> Vec<AutomationAction> {
        self.calls().into_iter().map(|(action, _)| action).collect()
    }
}

impl Default for RecordingDeployer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deployer for RecordingDeployer {
    fn name(&self) -> &str {
        "recording"
    }

    fn run<'a>(
        &'a self,
        action: AutomationAction,
        args: &'a AutomationArgs,
    ) -> BoxFuture<'a, Result<serde_json::Value, AutomationError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls lock")
                .push((action, args.clone()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.payload.clone())
        })
    }
}
