//! Server lifecycle against a scripted bridge.

use std::sync::Arc;
use std::time::Duration;

use hookfleet_core::outcome::StepOutcome;
use hookfleet_core::server::{DeployStep, ServerManager, ServerProcessState, SettleStrategy};
use hookfleet_test_utils::{CallKind, ScriptedBridge, exit, ok, simulated_server};

const BINARY: &str = "./etc/frida-server-15.1.14-android-arm";

fn manager(bridge: &Arc<ScriptedBridge>, settle: SettleStrategy) -> ServerManager {
    ServerManager::new(bridge.clone(), "srv", BINARY, settle)
}

// ===========================================================================
// Find
// ===========================================================================

#[tokio::test]
async fn find_echoes_matching_process_line() {
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]).respond(|_| ok("root 123 srv\n")));
    let servers = manager(&bridge, SettleStrategy::default());

    let state = servers.find("A").await;
    assert_eq!(state, ServerProcessState::found("root 123 srv"));
    assert_eq!(bridge.shell_commands("A"), vec!["su -c ps | grep srv"]);
}

#[tokio::test]
async fn find_with_empty_output_is_not_found() {
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]).respond(|_| ok("")));
    let servers = manager(&bridge, SettleStrategy::default());
    assert_eq!(servers.find("A").await, ServerProcessState::NotFound);
}

#[tokio::test]
async fn find_query_error_is_not_found() {
    let bridge = Arc::new(
        ScriptedBridge::with_devices(&["A"]).respond(|_| exit(1, "error: device offline")),
    );
    let servers = manager(&bridge, SettleStrategy::default());
    assert_eq!(servers.find("A").await, ServerProcessState::NotFound);
}

#[tokio::test]
async fn find_keeps_every_line_mentioning_the_server() {
    let bridge = Arc::new(
        ScriptedBridge::with_devices(&["A"])
            .respond(|_| ok("root 1 init\nroot 99 srv\nshell 7 grep srv-other\n")),
    );
    let servers = manager(&bridge, SettleStrategy::default());
    let ServerProcessState::Found { lines } = servers.find("A").await else {
        panic!("expected server to be found");
    };
    assert!(lines.contains("root 99 srv"));
    assert!(!lines.contains("init"));
    // Matching is by substring, like the grep on the device.
    assert!(lines.contains("grep srv-other"));
    assert_eq!(lines.lines().count(), 2);
}

// ===========================================================================
// Deploy
// ===========================================================================

#[tokio::test]
async fn deploy_pushes_then_fixes_owner_and_mode() {
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]));
    let servers = manager(&bridge, SettleStrategy::default());

    servers.deploy("A").await.expect("deploy should succeed");

    let calls = bridge.calls();
    let push = calls.iter().find(|c| c.kind == CallKind::Push).expect("push call");
    assert_eq!(push.command, format!("{BINARY} -> /data/local/tmp/srv"));
    assert_eq!(
        bridge.shell_commands("A"),
        vec![
            "su -c chown root:root /data/local/tmp/srv",
            "su -c chmod 775 /data/local/tmp/srv",
        ]
    );
}

#[tokio::test]
async fn deploy_stops_at_first_failing_step() {
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]).respond(|call| {
        if call.kind == CallKind::Push {
            exit(1, "adb: error: failed to copy")
        } else {
            ok("")
        }
    }));
    let servers = manager(&bridge, SettleStrategy::default());

    let err = servers.deploy("A").await.expect_err("push fails");
    assert_eq!(err.step, DeployStep::Push);
    assert!(err.to_string().contains("failed to copy"));
    assert!(bridge.shell_commands("A").is_empty(), "no chown/chmod after failed push");
}

// ===========================================================================
// Start / stop
// ===========================================================================

#[tokio::test]
async fn stop_when_not_running_is_ok() {
    let bridge =
        Arc::new(ScriptedBridge::with_devices(&["A"]).respond(simulated_server("srv", &[])));
    let servers = manager(&bridge, SettleStrategy::default());
    assert_eq!(servers.stop("A").await, StepOutcome::Ok);
    assert_eq!(bridge.shell_commands("A"), vec!["su -c pkill srv"]);
}

#[tokio::test]
async fn stop_failure_other_than_no_match_is_failed() {
    let bridge =
        Arc::new(ScriptedBridge::with_devices(&["A"]).respond(|_| exit(255, "su: not found")));
    let servers = manager(&bridge, SettleStrategy::default());
    assert!(matches!(servers.stop("A").await, StepOutcome::Failed { .. }));
}

#[tokio::test]
async fn start_backgrounds_binary_with_redirected_output() {
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]));
    let servers = manager(&bridge, SettleStrategy::default());
    assert_eq!(servers.start("A").await, StepOutcome::Ok);
    assert_eq!(
        bridge.shell_commands("A"),
        vec!["su -c nohup /data/local/tmp/srv > /dev/null 2>&1 &"]
    );
}

// ===========================================================================
// Restart
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn restart_with_fixed_window_runs_exactly_two_verification_finds() {
    let bridge =
        Arc::new(ScriptedBridge::with_devices(&["A"]).respond(simulated_server("srv", &["A"])));
    let servers = manager(&bridge, SettleStrategy::fixed(Duration::from_secs(10)));

    let report = servers.restart("A").await;

    let find = "su -c ps | grep srv";
    assert_eq!(
        bridge.shell_commands("A"),
        vec![
            find,
            "su -c pkill srv",
            find,
            "su -c nohup /data/local/tmp/srv > /dev/null 2>&1 &",
            find,
        ]
    );

    assert!(report.initial.is_found());
    assert_eq!(report.stop, StepOutcome::Ok);
    assert_eq!(report.after_stop, ServerProcessState::NotFound);
    assert_eq!(report.start, StepOutcome::Ok);
    assert!(report.is_running());
}

#[tokio::test(start_paused = true)]
async fn restart_waits_the_window_after_stop_and_start() {
    let bridge =
        Arc::new(ScriptedBridge::with_devices(&["A"]).respond(simulated_server("srv", &[])));
    let servers = manager(&bridge, SettleStrategy::fixed(Duration::from_secs(10)));

    servers.restart("A").await;

    let calls: Vec<_> = bridge.calls().into_iter().filter(|c| c.is_shell_on("A")).collect();
    assert_eq!(calls.len(), 5);
    assert!(calls[2].at - calls[1].at >= Duration::from_secs(10), "find after stop waits");
    assert!(calls[4].at - calls[3].at >= Duration::from_secs(10), "find after start waits");
}

#[tokio::test(start_paused = true)]
async fn restart_with_polling_returns_as_soon_as_server_is_up() {
    let bridge =
        Arc::new(ScriptedBridge::with_devices(&["A"]).respond(simulated_server("srv", &[])));
    let servers = manager(
        &bridge,
        SettleStrategy::poll(Duration::from_secs(1), Duration::from_secs(10)),
    );

    let started = tokio::time::Instant::now();
    let report = servers.restart("A").await;

    assert!(report.is_running());
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn restart_proceeds_when_server_never_comes_up() {
    // Server never appears: every find reports nothing.
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]).respond(|call| {
        if call.command.contains("ps |") {
            exit(1, "")
        } else {
            ok("")
        }
    }));
    let servers = manager(&bridge, SettleStrategy::fixed(Duration::from_secs(10)));

    let report = servers.restart("A").await;

    assert_eq!(report.start, StepOutcome::Ok);
    assert_eq!(report.after_start, ServerProcessState::NotFound);
    assert!(!report.is_running());
}

#[tokio::test(start_paused = true)]
async fn restart_keeps_its_sequence_when_stop_and_start_fail() {
    let bridge = Arc::new(ScriptedBridge::with_devices(&["A"]).respond(|call| {
        if call.command.contains("pkill") || call.command.contains("nohup") {
            exit(255, "su: permission denied")
        } else {
            ok("")
        }
    }));
    let servers = manager(&bridge, SettleStrategy::fixed(Duration::from_secs(10)));

    let report = servers.restart("A").await;

    let find = "su -c ps | grep srv";
    assert_eq!(
        bridge.shell_commands("A"),
        vec![
            find,
            "su -c pkill srv",
            find,
            "su -c nohup /data/local/tmp/srv > /dev/null 2>&1 &",
            find,
        ]
    );
    assert!(matches!(report.stop, StepOutcome::Failed { .. }), "got {:?}", report.stop);
    assert!(matches!(report.start, StepOutcome::Failed { .. }), "got {:?}", report.start);
    assert!(!report.is_running());
}
