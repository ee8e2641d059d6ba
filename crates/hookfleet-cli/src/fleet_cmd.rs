//! Single-phase fleet commands (`deploy`, `find`, `launch`, `attach`, ...)
//! and `devices`.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;

use hookfleet_core::bridge::Bridge;
use hookfleet_core::device::{self, screen::query_screen_size};
use hookfleet_core::orchestrator::{LineStatus, PhaseValue};
use hookfleet_core::{Orchestrator, RunConfig};

use crate::output::{self, EXIT_NONE_SUCCEEDED, EXIT_SUCCESS, StatusPrinter};
use crate::run_cmd::{build_orchestrator, hold_sessions, install_interrupt_handler};

/// One phase run on its own against every attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetCommand {
    Deploy,
    Find,
    Start,
    Stop,
    Restart,
    Launch,
    Kill,
    Attach { hold: bool },
    PushPayload,
    Tap,
}

fn statuses<T: PhaseValue>(values: &[T]) -> Vec<LineStatus> {
    values.iter().map(PhaseValue::status).collect()
}

/// Discover devices, run one phase on them, map the lines to an exit code.
pub async fn execute(
    orchestrator: &Orchestrator,
    printer: &StatusPrinter,
    command: FleetCommand,
) -> Result<u8> {
    let devices = orchestrator.discover().await?;
    if devices.is_empty() {
        if !printer.is_json() {
            println!("No devices attached.");
        }
        tracing::warn!("no devices attached, nothing to do");
        return Ok(EXIT_NONE_SUCCEEDED);
    }

    let mut sessions = Vec::new();
    let lines = match command {
        FleetCommand::Deploy => statuses(&orchestrator.deploy_all(&devices).await),
        FleetCommand::Find => statuses(&orchestrator.find_all(&devices).await),
        FleetCommand::Start => statuses(&orchestrator.start_all(&devices).await),
        FleetCommand::Stop => statuses(&orchestrator.stop_all(&devices).await),
        FleetCommand::Restart => statuses(&orchestrator.restart_all(&devices).await),
        FleetCommand::Launch => statuses(&orchestrator.launch_all(&devices).await),
        FleetCommand::Kill => statuses(&orchestrator.terminate_all(&devices).await),
        FleetCommand::PushPayload => statuses(&orchestrator.push_payload_all(&devices).await),
        FleetCommand::Tap => statuses(&orchestrator.tap_all(&devices).await),
        FleetCommand::Attach { .. } => {
            let attachments = orchestrator.attach_all(&devices).await;
            let lines = statuses(&attachments);
            sessions.extend(attachments.into_iter().filter_map(|a| a.session));
            lines
        }
    };

    if printer.is_json() {
        output::print_json(&printer.take_reports())?;
    }

    if let FleetCommand::Attach { hold: true } = command {
        hold_sessions(sessions, orchestrator.cancel_token()).await;
    } else {
        for session in sessions {
            session.detach().await;
        }
    }

    Ok(output::phase_exit_code(&lines))
}

/// Run a single-phase command.
pub async fn run(config: RunConfig, json: bool, command: FleetCommand) -> Result<ExitCode> {
    let cancel = install_interrupt_handler();
    let printer = Arc::new(StatusPrinter::new(json));
    let orchestrator = build_orchestrator(config, Arc::clone(&printer), cancel);
    let code = execute(&orchestrator, &printer, command).await?;
    Ok(ExitCode::from(code))
}

/// List attached devices, optionally with screen sizes.
pub async fn list_devices(bridge: &dyn Bridge, screen: bool, json: bool) -> Result<u8> {
    let mut devices = device::discover(bridge).await?;

    if screen {
        let sizes =
            futures::future::join_all(devices.iter().map(|d| query_screen_size(bridge, &d.id)))
                .await;
        for (device, size) in devices.iter_mut().zip(sizes) {
            device.screen = Some(size);
        }
    }

    if json {
        output::print_json(&devices)?;
    } else if devices.is_empty() {
        println!("No devices attached.");
    } else {
        for device in &devices {
            match device.screen {
                Some(size) => println!("{} | {} | {size}", device.id, device.state),
                None => println!("{} | {}", device.id, device.state),
            }
        }
    }

    Ok(if devices.is_empty() {
        EXIT_NONE_SUCCEEDED
    } else {
        EXIT_SUCCESS
    })
}
