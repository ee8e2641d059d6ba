//! Per-phase status lines and the per-device run report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::agent::AgentSession;
use crate::device::{Device, ScreenSize};
use crate::outcome::StepOutcome;
use crate::server::{RestartReport, ServerProcessState};

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// A step of the orchestration state machine, or a standalone fleet command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Discover,
    PushPayload,
    Deploy,
    FindServers,
    StopServers,
    StartServers,
    RestartServers,
    LaunchApps,
    TerminateApps,
    Settle,
    Attach,
    QueryScreens,
    Tap,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heading = match self {
            Self::Init => "Initializing",
            Self::Discover => "Discovering devices",
            Self::PushPayload => "Pushing payload",
            Self::Deploy => "Deploying server",
            Self::FindServers => "Looking for server",
            Self::StopServers => "Stopping server",
            Self::StartServers => "Starting server",
            Self::RestartServers => "Restarting server",
            Self::LaunchApps => "Launching app",
            Self::TerminateApps => "Closing app",
            Self::Settle => "Waiting for apps to settle",
            Self::Attach => "Attaching agent",
            Self::QueryScreens => "Querying screen sizes",
            Self::Tap => "Tapping",
            Self::Done => "Done",
        };
        f.write_str(heading)
    }
}

// ---------------------------------------------------------------------------
// Status lines
// ---------------------------------------------------------------------------

/// What a status line says about one device in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LineStatus {
    Ok,
    /// Raw process-table lines for a server that was found.
    Found(String),
    NotFound,
    Failed(String),
    Interrupted,
    /// Free-form information (device state, screen size).
    Info(String),
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Found(lines) => f.write_str(lines),
            Self::NotFound => f.write_str("NOT FOUND"),
            Self::Failed(message) => write!(f, "FAILED: {message}"),
            Self::Interrupted => f.write_str("INTERRUPTED"),
            Self::Info(text) => f.write_str(text),
        }
    }
}

/// `<device> | <status>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub device: String,
    pub status: LineStatus,
}

impl StatusLine {
    pub fn new(device: impl Into<String>, status: LineStatus) -> Self {
        Self {
            device: device.into(),
            status,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.device, self.status)
    }
}

/// All status lines of one completed phase, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub lines: Vec<StatusLine>,
}

impl PhaseReport {
    pub fn failed_devices(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| matches!(l.status, LineStatus::Failed(_)))
            .map(|l| l.device.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Phase values
// ---------------------------------------------------------------------------

/// A per-device phase result that can stand in for a task that never
/// finished.
pub trait PhaseValue: Send + 'static {
    /// The run was cancelled before the device's work completed.
    fn interrupted() -> Self;
    /// The device's task died (panicked) without producing a value.
    fn aborted(message: String) -> Self;
    fn status(&self) -> LineStatus;
}

impl PhaseValue for StepOutcome {
    fn interrupted() -> Self {
        StepOutcome::Interrupted
    }

    fn aborted(message: String) -> Self {
        StepOutcome::Failed { message }
    }

    fn status(&self) -> LineStatus {
        match self {
            StepOutcome::Ok => LineStatus::Ok,
            StepOutcome::Failed { message } => LineStatus::Failed(message.clone()),
            StepOutcome::Interrupted => LineStatus::Interrupted,
        }
    }
}

impl PhaseValue for ServerProcessState {
    fn interrupted() -> Self {
        ServerProcessState::Unknown
    }

    fn aborted(message: String) -> Self {
        ServerProcessState::Aborted { message }
    }

    fn status(&self) -> LineStatus {
        match self {
            ServerProcessState::Found { lines } => LineStatus::Found(lines.clone()),
            ServerProcessState::NotFound => LineStatus::NotFound,
            ServerProcessState::Aborted { message } => LineStatus::Failed(message.clone()),
            ServerProcessState::Unknown => LineStatus::Interrupted,
        }
    }
}

impl PhaseValue for RestartReport {
    fn interrupted() -> Self {
        RestartReport {
            initial: ServerProcessState::Unknown,
            stop: StepOutcome::Interrupted,
            after_stop: ServerProcessState::Unknown,
            start: StepOutcome::Interrupted,
            after_start: ServerProcessState::Unknown,
        }
    }

    fn aborted(message: String) -> Self {
        RestartReport {
            initial: ServerProcessState::Unknown,
            stop: StepOutcome::failed(message.clone()),
            after_stop: ServerProcessState::Unknown,
            start: StepOutcome::failed(message),
            after_start: ServerProcessState::Unknown,
        }
    }

    fn status(&self) -> LineStatus {
        match (&self.after_start, &self.start) {
            (ServerProcessState::Found { lines }, _) => LineStatus::Found(lines.clone()),
            (_, StepOutcome::Failed { message })
            | (ServerProcessState::Aborted { message }, _) => LineStatus::Failed(message.clone()),
            (_, StepOutcome::Interrupted) | (ServerProcessState::Unknown, _) => {
                LineStatus::Interrupted
            }
            (ServerProcessState::NotFound, _) => {
                LineStatus::Failed("server not running after restart".to_string())
            }
        }
    }
}

impl PhaseValue for Option<ScreenSize> {
    fn interrupted() -> Self {
        None
    }

    fn aborted(_message: String) -> Self {
        None
    }

    fn status(&self) -> LineStatus {
        match self {
            Some(size) => LineStatus::Info(size.to_string()),
            None => LineStatus::Interrupted,
        }
    }
}

/// Result of attaching on one device: the outcome plus the live session.
#[derive(Debug)]
pub struct Attachment {
    pub outcome: StepOutcome,
    pub session: Option<AgentSession>,
}

impl PhaseValue for Attachment {
    fn interrupted() -> Self {
        Attachment {
            outcome: StepOutcome::Interrupted,
            session: None,
        }
    }

    fn aborted(message: String) -> Self {
        Attachment {
            outcome: StepOutcome::Failed { message },
            session: None,
        }
    }

    fn status(&self) -> LineStatus {
        self.outcome.status()
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Everything that happened to one device during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub state: String,
    pub payload: Option<StepOutcome>,
    pub deploy: Option<StepOutcome>,
    pub restart: Option<RestartReport>,
    pub launch: Option<StepOutcome>,
    pub attach: Option<StepOutcome>,
}

impl DeviceOutcome {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.id.clone(),
            state: device.state.clone(),
            payload: None,
            deploy: None,
            restart: None,
            launch: None,
            attach: None,
        }
    }

    /// Server running after restart, app launched, agent attached.
    pub fn succeeded(&self) -> bool {
        self.restart.as_ref().is_some_and(RestartReport::is_running)
            && self.launch.as_ref().is_some_and(StepOutcome::is_ok)
            && self.attach.as_ref().is_some_and(StepOutcome::is_ok)
    }
}

/// How the run went across the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RunVerdict {
    AllSucceeded,
    Partial {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },
    /// No device made it end-to-end (including "no devices attached").
    NoneSucceeded,
}

/// Summary of one orchestration run. Lives only for the invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phases: Vec<Phase>,
    pub devices: Vec<DeviceOutcome>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            phases: vec![Phase::Init],
            devices: Vec::new(),
            interrupted: false,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        tracing::info!(run_id = %self.run_id, phase = ?phase, "entering phase");
        self.phases.push(phase);
    }

    /// Record per-device values; `values` is in the same order as `devices`.
    pub fn record<T>(
        &mut self,
        values: impl IntoIterator<Item = T>,
        apply: impl Fn(&mut DeviceOutcome, T),
    ) {
        for (outcome, value) in self.devices.iter_mut().zip(values) {
            apply(outcome, value);
        }
    }

    pub fn finish(&mut self, interrupted: bool) {
        self.interrupted = interrupted;
        if !interrupted {
            self.phases.push(Phase::Done);
        }
        self.finished_at = Some(Utc::now());
    }

    pub fn verdict(&self) -> RunVerdict {
        let (succeeded, failed): (Vec<&DeviceOutcome>, Vec<&DeviceOutcome>) =
            self.devices.iter().partition(|d| d.succeeded());

        if succeeded.is_empty() {
            RunVerdict::NoneSucceeded
        } else if failed.is_empty() {
            RunVerdict::AllSucceeded
        } else {
            RunVerdict::Partial {
                succeeded: succeeded.iter().map(|d| d.device.clone()).collect(),
                failed: failed.iter().map(|d| d.device.clone()).collect(),
            }
        }
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
