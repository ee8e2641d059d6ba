//! `hookfleet run` command: the full orchestration run.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use hookfleet_core::agent::{AgentSession, FridaAgent};
use hookfleet_core::bridge::AdbBridge;
use hookfleet_core::orchestrator::{DeviceOutcome, OrchestrationResult, RunReport};
use hookfleet_core::{Orchestrator, RunConfig, RunOptions};

use crate::output::{self, EXIT_INTERRUPTED, StatusPrinter};

/// First Ctrl+C cancels the token, the second force-exits.
pub fn install_interrupt_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    cancel
}

/// Wire the real adb bridge and frida agent into an orchestrator.
pub fn build_orchestrator(
    config: RunConfig,
    printer: Arc<StatusPrinter>,
    cancel: CancellationToken,
) -> Orchestrator {
    let bridge =
        AdbBridge::new(config.tools.adb.clone()).with_timeout(config.timing.command_timeout);
    let agent =
        FridaAgent::with_binary(config.tools.agent.clone()).with_grace(config.timing.attach_grace);
    Orchestrator::new(Arc::new(bridge), Arc::new(agent), config)
        .with_observer(printer)
        .with_cancellation(cancel)
}

/// Keep attached agents alive until they all exit or the run is cancelled.
///
/// Cancelling drops the sessions, which kills their agent processes.
pub async fn hold_sessions(sessions: Vec<AgentSession>, cancel: &CancellationToken) {
    if sessions.is_empty() {
        return;
    }
    eprintln!(
        "\n{} agent session(s) attached. Press Ctrl+C to detach.",
        sessions.len()
    );

    let waits = sessions.into_iter().map(|mut session| async move {
        let status = session.wait().await;
        tracing::info!(device = %session.device, status = ?status, "agent exited");
    });

    tokio::select! {
        _ = cancel.cancelled() => tracing::info!("detaching agents"),
        _ = futures::future::join_all(waits) => tracing::info!("all agents exited"),
    }
}

/// One-line description of how a device fared.
fn describe(outcome: &DeviceOutcome) -> String {
    if outcome.succeeded() {
        return "OK".to_string();
    }
    match (&outcome.restart, &outcome.launch, &outcome.attach) {
        (Some(restart), _, _) if !restart.is_running() => "FAILED: server not running".to_string(),
        (None, _, _) => "INCOMPLETE: server not restarted".to_string(),
        (_, Some(launch), _) if !launch.is_ok() => "FAILED: app launch".to_string(),
        (_, None, _) => "INCOMPLETE: app not launched".to_string(),
        (_, _, None) => "INCOMPLETE: agent not attached".to_string(),
        (_, _, Some(_)) => "FAILED: agent attach".to_string(),
    }
}

fn print_summary(report: &RunReport) {
    println!("\nSummary (run {}):", report.run_id);
    if report.devices.is_empty() {
        println!("  no devices attached");
    }
    for outcome in &report.devices {
        println!("  {} | {}", outcome.device, describe(outcome));
    }
}

fn emit_report(printer: &StatusPrinter, report: &RunReport) -> Result<()> {
    if printer.is_json() {
        output::print_json(&serde_json::json!({
            "report": report,
            "verdict": report.verdict(),
            "phases": printer.take_reports(),
        }))
    } else {
        print_summary(report);
        Ok(())
    }
}

/// Run every phase and map the outcome to an exit code.
pub async fn execute_run(
    orchestrator: &Orchestrator,
    printer: &StatusPrinter,
    options: &RunOptions,
    hold: bool,
) -> Result<u8> {
    let result = orchestrator.run(options).await?;

    match result {
        OrchestrationResult::Completed { report, sessions } => {
            emit_report(printer, &report)?;
            let code = output::verdict_exit_code(&report.verdict());
            if hold {
                hold_sessions(sessions, orchestrator.cancel_token()).await;
            } else {
                for session in sessions {
                    session.detach().await;
                }
            }
            Ok(code)
        }
        OrchestrationResult::Interrupted { report } => {
            emit_report(printer, &report)?;
            if !printer.is_json() {
                println!("\nRun interrupted.");
            }
            Ok(EXIT_INTERRUPTED)
        }
    }
}

/// Run the `run` command.
pub async fn run(
    config: RunConfig,
    json: bool,
    options: RunOptions,
    hold: bool,
) -> Result<ExitCode> {
    let cancel = install_interrupt_handler();
    let printer = Arc::new(StatusPrinter::new(json));

    if !json {
        println!(
            "Instrumenting {} ({}) with server {}",
            config.target.app_name, config.target.package_name, config.target.server_name
        );
    }

    let orchestrator = build_orchestrator(config, Arc::clone(&printer), cancel);
    let code = execute_run(&orchestrator, &printer, &options, hold).await?;
    Ok(ExitCode::from(code))
}
