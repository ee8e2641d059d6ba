//! Shared test doubles for hookfleet integration tests.
//!
//! - [`ScriptedBridge`]: an in-memory [`Bridge`] that records every call
//!   (with a tokio timestamp, so paused-time tests can check ordering) and
//!   answers from a responder closure.
//! - [`RecordingAgent`]: an [`InstrumentationAgent`] that records attaches
//!   and fails on selected devices.
//! - [`simulated_server`]: a responder that models the server process
//!   starting and stopping on each device.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use hookfleet_core::agent::{AgentSession, InstrumentationAgent};
use hookfleet_core::bridge::{Bridge, BridgeError, CommandOutput, CommandResult};

// ===========================================================================
// Bridge double
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    StartServer,
    ListDevices,
    Push,
    Shell,
}

/// One call made against a [`ScriptedBridge`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    /// `None` for host-level calls (start-server, devices).
    pub device: Option<String>,
    /// Shell command, or `"<local> -> <remote>"` for pushes.
    pub command: String,
    pub at: Instant,
}

impl RecordedCall {
    pub fn is_shell_on(&self, device: &str) -> bool {
        self.kind == CallKind::Shell && self.device.as_deref() == Some(device)
    }
}

type Responder = dyn Fn(&RecordedCall) -> CommandResult + Send + Sync;

/// In-memory bridge with a fixed device listing.
pub struct ScriptedBridge {
    listing: Result<String, String>,
    responder: Box<Responder>,
    latency: Duration,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBridge {
    /// Bridge listing `devices` (all in state `device`); every push and
    /// shell succeeds with empty output.
    pub fn with_devices(devices: &[&str]) -> Self {
        let mut listing = String::from("List of devices attached\n");
        for device in devices {
            listing.push_str(&format!("{device}\tdevice\n"));
        }
        Self {
            listing: Ok(listing),
            responder: Box::new(|_: &RecordedCall| ok("")),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Bridge whose device listing fails.
    pub fn unreachable(stderr: &str) -> Self {
        Self {
            listing: Err(stderr.to_string()),
            ..Self::with_devices(&[])
        }
    }

    /// Answer push and shell calls with `responder`.
    pub fn respond(
        mut self,
        responder: impl Fn(&RecordedCall) -> CommandResult + Send + Sync + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    /// Delay every push and shell answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Shell commands issued on `device`, in order.
    pub fn shell_commands(&self, device: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.is_shell_on(device))
            .map(|c| c.command)
            .collect()
    }

    /// Calls against `device` whose command contains `needle`.
    pub fn calls_matching(&self, device: &str, needle: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.device.as_deref() == Some(device) && c.command.contains(needle))
            .collect()
    }

    fn record(&self, kind: CallKind, device: Option<&str>, command: String) -> RecordedCall {
        let call = RecordedCall {
            kind,
            device: device.map(str::to_string),
            command,
            at: Instant::now(),
        };
        self.calls.lock().unwrap().push(call.clone());
        call
    }

    async fn answer(&self, call: RecordedCall) -> CommandResult {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(&call)
    }
}

#[async_trait]
impl Bridge for ScriptedBridge {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start_server(&self) -> CommandResult {
        self.record(CallKind::StartServer, None, "start-server".to_string());
        ok("")
    }

    async fn list_devices(&self) -> CommandResult {
        self.record(CallKind::ListDevices, None, "devices".to_string());
        match &self.listing {
            Ok(listing) => ok(listing),
            Err(stderr) => exit(1, stderr),
        }
    }

    async fn push(&self, device: &str, local: &Path, remote: &str) -> CommandResult {
        let call = self.record(
            CallKind::Push,
            Some(device),
            format!("{} -> {remote}", local.display()),
        );
        self.answer(call).await
    }

    async fn shell(&self, device: &str, command: &str) -> CommandResult {
        let call = self.record(CallKind::Shell, Some(device), command.to_string());
        self.answer(call).await
    }
}

/// Successful output with `stdout`.
pub fn ok(stdout: &str) -> CommandResult {
    Ok(CommandOutput::from_stdout(stdout))
}

/// Non-zero exit with `stderr`.
pub fn exit(code: i32, stderr: &str) -> CommandResult {
    Err(BridgeError::Exit {
        program: "adb".to_string(),
        code: Some(code),
        stderr: stderr.to_string(),
    })
}

/// Responder modelling one server process per device.
///
/// `nohup` starts it, `pkill <server>` stops it, `ps | grep <server>`
/// lists it (exiting 1 with no output when it is down, like grep). Devices
/// in `running` start with the server up. Everything else succeeds.
pub fn simulated_server(
    server_name: &str,
    running: &[&str],
) -> impl Fn(&RecordedCall) -> CommandResult + Send + Sync + 'static {
    let server_name = server_name.to_string();
    let state: Mutex<HashSet<String>> =
        Mutex::new(running.iter().map(|d| (*d).to_string()).collect());

    move |call: &RecordedCall| {
        let Some(device) = call.device.as_deref() else {
            return ok("");
        };
        if call.kind != CallKind::Shell {
            return ok("");
        }
        let mut up = state.lock().unwrap();
        let command = call.command.as_str();
        if command.contains("nohup") {
            up.insert(device.to_string());
            ok("")
        } else if command.contains(&format!("pkill {server_name}")) {
            if up.remove(device) {
                ok("")
            } else {
                exit(1, "")
            }
        } else if command.contains("ps |") {
            if up.contains(device) {
                ok(&format!("root      4242     1 0 12:00 ? 00:00:01 {server_name}\n"))
            } else {
                exit(1, "")
            }
        } else {
            ok("")
        }
    }
}

// ===========================================================================
// Agent double
// ===========================================================================

/// One attach made against a [`RecordingAgent`].
#[derive(Debug, Clone)]
pub struct RecordedAttach {
    pub device: String,
    pub target: String,
    pub script: PathBuf,
    pub at: Instant,
}

/// Agent that records attaches and never spawns anything.
#[derive(Default)]
pub struct RecordingAgent {
    failures: HashMap<String, String>,
    attaches: Mutex<Vec<RecordedAttach>>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make attaching on `device` fail with `stderr`.
    pub fn fail_on(mut self, device: &str, stderr: &str) -> Self {
        self.failures.insert(device.to_string(), stderr.to_string());
        self
    }

    pub fn attaches(&self) -> Vec<RecordedAttach> {
        self.attaches.lock().unwrap().clone()
    }
}

#[async_trait]
impl InstrumentationAgent for RecordingAgent {
    fn name(&self) -> &str {
        "recording"
    }

    async fn attach(
        &self,
        device: &str,
        target: &str,
        script: &Path,
    ) -> Result<AgentSession, BridgeError> {
        self.attaches.lock().unwrap().push(RecordedAttach {
            device: device.to_string(),
            target: target.to_string(),
            script: script.to_path_buf(),
            at: Instant::now(),
        });
        match self.failures.get(device) {
            Some(stderr) => Err(BridgeError::Exit {
                program: "frida".to_string(),
                code: Some(1),
                stderr: stderr.clone(),
            }),
            None => Ok(AgentSession::finished(device, target)),
        }
    }
}
