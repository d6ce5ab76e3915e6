//! Dispatcher behaviour: arm gate, confirmation, automation routing, lane.

use std::sync::Arc;
use std::time::{Duration, Instant};

use plcwarden_core::automation::AutomationAction;
use plcwarden_core::dispatch::{CommandRequest, Dispatcher};
use plcwarden_core::gate::ArmGate;
use plcwarden_core::result::ErrorKind;
use plcwarden_core::{ControllerMode, SimulatedController};
use plcwarden_test_utils::fixtures::{
    DEMO_AMS_NET_ID, DEMO_PORT, ManualClock, RecordingDeployer, demo_controller,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const SOLUTION: &str = "C:/projects/line3/line3.sln";

fn dispatcher_with(
    gate: ArmGate,
    sim: &SimulatedController,
    deployer: &RecordingDeployer,
) -> Dispatcher {
    Dispatcher::new(Arc::new(gate), Arc::new(sim.clone()), Arc::new(deployer.clone()))
        .with_default_target(Some(DEMO_AMS_NET_ID.parse().unwrap()), DEMO_PORT)
}

fn dispatcher(sim: &SimulatedController, deployer: &RecordingDeployer) -> Dispatcher {
    dispatcher_with(
        ArmGate::new(Duration::from_secs(300), Duration::from_secs(3600)),
        sim,
        deployer,
    )
}

fn write(path: &str, value: &str) -> CommandRequest {
    CommandRequest::new("write_variable")
        .param("path", path)
        .param("value", value)
}

#[tokio::test]
async fn dangerous_command_refused_while_disarmed() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new();
    let d = dispatcher(&sim, &deployer);

    let result = d.dispatch(write("GVL.nCount", "1")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::NotArmed));
    assert!(result.error_message.unwrap().contains("armed"));

    let result = d
        .dispatch(
            CommandRequest::new("deploy")
                .param("solutionPath", SOLUTION)
                .confirm("CONFIRM"),
        )
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::NotArmed));

    assert_eq!(sim.stats().connects, 0);
    assert!(deployer.calls().is_empty());
}

#[tokio::test]
async fn safe_commands_need_no_arm() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new();
    let d = dispatcher(&sim, &deployer);

    let read = d
        .dispatch(CommandRequest::new("read_variable").param("path", "GVL.nCount"))
        .await;
    assert_eq!(read.value.as_deref(), Some("42"));

    let state = d.dispatch(CommandRequest::new("get_state")).await;
    assert!(state.success);
    assert_eq!(state.value.as_deref(), Some("Run"));
    assert_eq!(state.data.unwrap()["running"], true);

    let build = d
        .dispatch(CommandRequest::new("build").param("solutionPath", SOLUTION))
        .await;
    assert!(build.success);
    assert_eq!(deployer.actions(), vec![AutomationAction::Build]);
}

#[tokio::test]
async fn arm_window_expires_lazily() {
    let clock = ManualClock::new();
    let sim = demo_controller();
    let deployer = RecordingDeployer::new();
    let gate = ArmGate::with_clock(Duration::from_secs(300), Duration::from_secs(3600), clock.clone());
    let d = dispatcher_with(gate, &sim, &deployer);

    let armed = d
        .dispatch(CommandRequest::new("arm").param("ttlSeconds", 60))
        .await;
    assert_eq!(armed.data.unwrap(), json!({"armed": true, "expiresInSeconds": 60}));

    clock.advance(Duration::from_secs(59));
    assert!(d.dispatch(write("GVL.nCount", "1")).await.success);

    clock.advance(Duration::from_secs(1));
    let refused = d.dispatch(write("GVL.nCount", "2")).await;
    assert_eq!(refused.error_kind, Some(ErrorKind::NotArmed));

    let status = d.dispatch(CommandRequest::new("arm_status")).await;
    assert_eq!(status.data.unwrap()["armed"], false);
    assert_eq!(sim.symbol_bytes("GVL.nCount"), Some(1i32.to_le_bytes().to_vec()));
}

#[tokio::test]
async fn real_clock_expiry_after_short_ttl() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new();
    let d = dispatcher_with(
        ArmGate::new(Duration::from_secs(2), Duration::from_secs(10)),
        &sim,
        &deployer,
    );

    assert!(d.dispatch(CommandRequest::new("arm")).await.success);
    assert!(d.dispatch(write("GVL.nCount", "5")).await.success);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let refused = d.dispatch(write("GVL.nCount", "6")).await;
    assert_eq!(refused.error_kind, Some(ErrorKind::NotArmed));
}

#[tokio::test]
async fn ttl_above_maximum_is_rejected() {
    let sim = demo_controller();
    let d = dispatcher(&sim, &RecordingDeployer::new());

    let result = d
        .dispatch(CommandRequest::new("arm").param("ttlSeconds", 7200))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert!(!d.gate().check_armed());
}

#[tokio::test]
async fn disarm_takes_effect_immediately() {
    let sim = demo_controller();
    let d = dispatcher(&sim, &RecordingDeployer::new());

    d.dispatch(CommandRequest::new("arm")).await;
    let disarmed = d.dispatch(CommandRequest::new("disarm")).await;
    assert_eq!(disarmed.data.unwrap(), json!({"armed": false}));

    let refused = d.dispatch(write("GVL.nCount", "9")).await;
    assert_eq!(refused.error_kind, Some(ErrorKind::NotArmed));
}

#[tokio::test]
async fn confirmation_is_checked_after_arm_and_can_be_retried() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new();
    let d = dispatcher(&sim, &deployer);
    d.dispatch(CommandRequest::new("arm")).await;

    let missing = d
        .dispatch(CommandRequest::new("restart").param("solutionPath", SOLUTION))
        .await;
    assert_eq!(missing.error_kind, Some(ErrorKind::Confirmation));
    assert!(missing.error_message.unwrap().contains("CONFIRM"));

    let wrong = d
        .dispatch(
            CommandRequest::new("restart")
                .param("solutionPath", SOLUTION)
                .confirm("confirm"),
        )
        .await;
    assert_eq!(wrong.error_kind, Some(ErrorKind::Confirmation));
    assert!(deployer.calls().is_empty());

    let ok = d
        .dispatch(
            CommandRequest::new("restart")
                .param("solutionPath", SOLUTION)
                .confirm("CONFIRM"),
        )
        .await;
    assert!(ok.success, "{ok:?}");
    assert_eq!(deployer.actions(), vec![AutomationAction::Restart]);
    assert!(d.gate().check_armed());
}

#[tokio::test]
async fn deploy_fills_default_target_and_reports_payload() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::with_payload(json!({"success": true, "activated": true}));
    let d = dispatcher(&sim, &deployer);
    d.dispatch(CommandRequest::new("arm")).await;

    let result = d
        .dispatch(
            CommandRequest::new("deploy")
                .param("solutionPath", SOLUTION)
                .param("plcName", "Line3")
                .param("dryRun", true)
                .confirm("CONFIRM"),
        )
        .await;
    assert!(result.success);
    assert_eq!(result.data.unwrap()["activated"], true);

    let (action, args) = deployer.calls().remove(0);
    assert_eq!(action, AutomationAction::Deploy);
    assert_eq!(args.ams_net_id.as_deref(), Some(DEMO_AMS_NET_ID));
    assert_eq!(args.plc_name.as_deref(), Some("Line3"));
    assert!(args.dry_run);
}

#[tokio::test]
async fn failed_payload_becomes_automation_error() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::with_payload(
        json!({"success": false, "errorMessage": "Solution file not found"}),
    );
    let d = dispatcher(&sim, &deployer);

    let result = d
        .dispatch(CommandRequest::new("build").param("solutionPath", SOLUTION))
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Automation));
    assert!(result.error_message.unwrap().contains("Solution file not found"));
}

#[tokio::test]
async fn automation_without_solution_is_invalid() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new();
    let d = dispatcher(&sim, &deployer);

    let result = d.dispatch(CommandRequest::new("clean")).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert!(deployer.calls().is_empty());
}

#[tokio::test]
async fn caller_timeout_is_reported() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new().with_delay(Duration::from_secs(5));
    let d = dispatcher(&sim, &deployer).with_command_timeout(Some(Duration::from_millis(100)));

    let started = Instant::now();
    let result = d
        .dispatch(CommandRequest::new("build").param("solutionPath", SOLUTION))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));

    // The lane is free again once the timed-out command is cancelled.
    let read = d
        .dispatch(CommandRequest::new("read_variable").param("path", "GVL.nCount"))
        .await;
    assert!(read.success);
}

#[tokio::test]
async fn commands_run_one_at_a_time() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new().with_delay(Duration::from_millis(300));
    let d = Arc::new(dispatcher(&sim, &deployer));

    let started = Instant::now();
    let slow = {
        let d = Arc::clone(&d);
        tokio::spawn(async move {
            d.dispatch(CommandRequest::new("get_info").param("solutionPath", SOLUTION))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let read = d
        .dispatch(CommandRequest::new("read_variable").param("path", "GVL.nCount"))
        .await;
    assert!(read.success);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(slow.await.unwrap().success);
}

#[tokio::test]
async fn gate_commands_bypass_a_busy_lane() {
    let sim = demo_controller();
    let deployer = RecordingDeployer::new().with_delay(Duration::from_millis(500));
    let d = Arc::new(dispatcher(&sim, &deployer));

    let slow = {
        let d = Arc::clone(&d);
        tokio::spawn(async move {
            d.dispatch(CommandRequest::new("build").param("solutionPath", SOLUTION))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert!(d.dispatch(CommandRequest::new("disarm")).await.success);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(slow.await.unwrap().success);
}

#[tokio::test]
async fn concurrent_writes_all_complete() {
    let sim = demo_controller();
    let d = Arc::new(dispatcher(&sim, &RecordingDeployer::new()));
    d.dispatch(CommandRequest::new("arm")).await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch(write("GVL.nCount", &i.to_string())).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().success);
    }

    let stats = sim.stats();
    assert_eq!(stats.handle_creates, 8);
    assert_eq!(stats.handle_deletes, 8);
    assert_eq!(sim.open_handles(), 0);
}

#[tokio::test]
async fn state_refusal_surfaces_through_dispatch() {
    let sim = demo_controller().with_mode(ControllerMode::Config);
    let d = dispatcher(&sim, &RecordingDeployer::new());

    let result = d
        .dispatch(CommandRequest::new("read_variable").param("path", "GVL.nCount"))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::State));
    assert!(result.error_message.unwrap().contains("not running"));

    let state = d.dispatch(CommandRequest::new("get_state")).await;
    assert_eq!(state.value.as_deref(), Some("Config"));
    assert_eq!(state.data.unwrap()["running"], false);
}
