//! Fleet orchestration.
//!
//! The [`Orchestrator`] drives every discovered device through the same
//! sequence of phases:
//!
//! ```text
//!   Init -> Discover -> [PushPayload] -> [Deploy] -> RestartServers
//!        -> LaunchApps -> Settle -> Attach -> Done
//! ```
//!
//! Within a phase each device runs as its own task; the phase ends when
//! every device's task has finished (join at the phase boundary). A failure
//! on one device is recorded in its [`DeviceOutcome`] and never stops the
//! other devices or the next phase. Only discovery failure is fatal.
//!
//! Cancellation is cooperative: the [`CancellationToken`] abandons in-flight
//! device work, skips all remaining phases and yields
//! [`OrchestrationResult::Interrupted`].

mod fanout;
pub mod report;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::InstrumentationAgent;
use crate::app::AppManager;
use crate::bridge::Bridge;
use crate::config::RunConfig;
use crate::device::screen::{query_screen_size, tap};
use crate::device::{self, Device, DiscoveryError, ScreenSize};
use crate::outcome::StepOutcome;
use crate::payload;
use crate::server::{RestartReport, ServerManager, ServerProcessState};

use fanout::fan_out;

pub use report::{
    Attachment, DeviceOutcome, LineStatus, Phase, PhaseReport, PhaseValue, RunReport, RunVerdict,
    StatusLine,
};

/// Receives phase progress as the run advances.
///
/// Callbacks are made from the orchestrating task, in phase order, after
/// every device of a phase has finished.
pub trait RunObserver: Send + Sync {
    fn phase_started(&self, _phase: Phase) {}
    fn phase_completed(&self, _report: &PhaseReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Optional stages of a full run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Push the server binary before restarting it.
    pub deploy: bool,
    /// Push the auxiliary payload file first.
    pub push_payload: bool,
}

/// Result of a full run.
#[derive(Debug)]
pub enum OrchestrationResult {
    /// All phases ran. `sessions` holds the agent sessions that attached.
    Completed {
        report: RunReport,
        sessions: Vec<crate::agent::AgentSession>,
    },
    /// The run was cancelled. Any sessions were already torn down.
    Interrupted { report: RunReport },
}

impl OrchestrationResult {
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Completed { report, .. } | Self::Interrupted { report } => report,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Coordinates all device pipelines of one run.
pub struct Orchestrator {
    bridge: Arc<dyn Bridge>,
    agent: Arc<dyn InstrumentationAgent>,
    config: Arc<RunConfig>,
    servers: ServerManager,
    apps: AppManager,
    observer: Arc<dyn RunObserver>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        agent: Arc<dyn InstrumentationAgent>,
        config: RunConfig,
    ) -> Self {
        let servers = ServerManager::new(
            Arc::clone(&bridge),
            config.target.server_name.clone(),
            config.artifacts.server_binary.clone(),
            config.timing.restart_settle,
        );
        let apps = AppManager::new(
            Arc::clone(&bridge),
            config.target.package_name.clone(),
            config.target.app_name.clone(),
        );
        Self {
            bridge,
            agent,
            config: Arc::new(config),
            servers,
            apps,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl+C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn servers(&self) -> &ServerManager {
        &self.servers
    }

    pub fn apps(&self) -> &AppManager {
        &self.apps
    }

    /// Start one task per device, join them all, report the phase.
    async fn run_phase<T, F, Fut>(&self, phase: Phase, devices: &[Device], work: F) -> Vec<T>
    where
        T: PhaseValue,
        F: Fn(String) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.observer.phase_started(phase);

        let values: Vec<(String, T)> = fan_out(devices, &self.cancel, work)
            .await
            .into_iter()
            .map(|(device, result)| (device, result.into_value()))
            .collect();

        let report = PhaseReport {
            phase,
            lines: values
                .iter()
                .map(|(device, value)| StatusLine::new(device.as_str(), value.status()))
                .collect(),
        };
        tracing::debug!(phase = ?phase, devices = values.len(), "phase joined");
        self.observer.phase_completed(&report);

        values.into_iter().map(|(_, value)| value).collect()
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// List attached devices. Failure here is fatal to a run.
    pub async fn discover(&self) -> Result<Vec<Device>, DiscoveryError> {
        self.observer.phase_started(Phase::Discover);
        let devices = device::discover(self.bridge.as_ref()).await?;
        self.observer.phase_completed(&PhaseReport {
            phase: Phase::Discover,
            lines: devices
                .iter()
                .map(|d| StatusLine::new(d.id.as_str(), LineStatus::Info(d.state.clone())))
                .collect(),
        });
        Ok(devices)
    }

    pub async fn push_payload_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let bridge = Arc::clone(&self.bridge);
        let local = self.config.artifacts.payload.clone();
        let remote_dir = self.config.artifacts.payload_remote_dir.clone();
        self.run_phase(Phase::PushPayload, devices, move |device| {
            let bridge = Arc::clone(&bridge);
            let local = local.clone();
            let remote_dir = remote_dir.clone();
            async move {
                payload::push_payload(bridge.as_ref(), &device, &local, &remote_dir).await
            }
        })
        .await
    }

    pub async fn deploy_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let servers = self.servers.clone();
        self.run_phase(Phase::Deploy, devices, move |device| {
            let servers = servers.clone();
            async move {
                match servers.deploy(&device).await {
                    Ok(()) => StepOutcome::Ok,
                    Err(e) => {
                        tracing::warn!(
                            device = %device,
                            step = %e.step,
                            error = %e.source,
                            "deploy failed"
                        );
                        StepOutcome::failed(e.to_string())
                    }
                }
            }
        })
        .await
    }

    pub async fn find_all(&self, devices: &[Device]) -> Vec<ServerProcessState> {
        let servers = self.servers.clone();
        self.run_phase(Phase::FindServers, devices, move |device| {
            let servers = servers.clone();
            async move { servers.find(&device).await }
        })
        .await
    }

    pub async fn stop_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let servers = self.servers.clone();
        self.run_phase(Phase::StopServers, devices, move |device| {
            let servers = servers.clone();
            async move { servers.stop(&device).await }
        })
        .await
    }

    pub async fn start_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let servers = self.servers.clone();
        self.run_phase(Phase::StartServers, devices, move |device| {
            let servers = servers.clone();
            async move { servers.start(&device).await }
        })
        .await
    }

    pub async fn restart_all(&self, devices: &[Device]) -> Vec<RestartReport> {
        let servers = self.servers.clone();
        self.run_phase(Phase::RestartServers, devices, move |device| {
            let servers = servers.clone();
            async move { servers.restart(&device).await }
        })
        .await
    }

    pub async fn launch_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let apps = self.apps.clone();
        self.run_phase(Phase::LaunchApps, devices, move |device| {
            let apps = apps.clone();
            async move { apps.launch(&device).await }
        })
        .await
    }

    pub async fn terminate_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let apps = self.apps.clone();
        self.run_phase(Phase::TerminateApps, devices, move |device| {
            let apps = apps.clone();
            async move { apps.terminate(&device).await }
        })
        .await
    }

    /// Blind wait for launched apps to come up. Returns `false` if cancelled.
    pub async fn settle(&self) -> bool {
        let window = self.config.timing.launch_settle;
        self.observer.phase_started(Phase::Settle);
        tracing::info!(window = ?window, "waiting for apps to settle");

        let elapsed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(window) => true,
        };

        self.observer.phase_completed(&PhaseReport {
            phase: Phase::Settle,
            lines: Vec::new(),
        });
        elapsed
    }

    /// Attach the agent to the app (by display name) on every device.
    pub async fn attach_all(&self, devices: &[Device]) -> Vec<Attachment> {
        let agent = Arc::clone(&self.agent);
        let target = self.config.target.app_name.clone();
        let script = self.config.artifacts.hook_script.clone();
        self.run_phase(Phase::Attach, devices, move |device| {
            let agent = Arc::clone(&agent);
            let target = target.clone();
            let script = script.clone();
            async move {
                match agent.attach(&device, &target, &script).await {
                    Ok(session) => Attachment {
                        outcome: StepOutcome::Ok,
                        session: Some(session),
                    },
                    Err(e) => {
                        tracing::warn!(
                            device = %device,
                            agent = agent.name(),
                            error = %e,
                            "attach failed"
                        );
                        Attachment {
                            outcome: StepOutcome::failed(e.to_string()),
                            session: None,
                        }
                    }
                }
            }
        })
        .await
    }

    /// Fill in each device's screen size.
    pub async fn query_screens(&self, devices: &[Device]) -> Vec<Device> {
        let bridge = Arc::clone(&self.bridge);
        let sizes: Vec<Option<ScreenSize>> = self
            .run_phase(Phase::QueryScreens, devices, move |device| {
                let bridge = Arc::clone(&bridge);
                async move { Some(query_screen_size(bridge.as_ref(), &device).await) }
            })
            .await;

        devices
            .iter()
            .zip(sizes)
            .map(|(device, screen)| Device {
                screen,
                ..device.clone()
            })
            .collect()
    }

    /// Tap each device at the fixed fraction of its screen.
    pub async fn tap_all(&self, devices: &[Device]) -> Vec<StepOutcome> {
        let bridge = Arc::clone(&self.bridge);
        self.run_phase(Phase::Tap, devices, move |device| {
            let bridge = Arc::clone(&bridge);
            async move {
                let size = query_screen_size(bridge.as_ref(), &device).await;
                let point = size.tap_target();
                tracing::debug!(device = %device, screen = %size, point = %point, "tapping");
                tap(bridge.as_ref(), &device, point).await
            }
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Full run
    // -----------------------------------------------------------------------

    /// Run every phase against every attached device.
    ///
    /// Returns `Err` only when discovery fails. Zero devices is a completed
    /// run with an empty report.
    pub async fn run(&self, options: &RunOptions) -> Result<OrchestrationResult, DiscoveryError> {
        let mut report = RunReport::new();
        tracing::info!(
            run_id = %report.run_id,
            app = %self.config.target.app_name,
            package = %self.config.target.package_name,
            server = %self.config.target.server_name,
            deploy = options.deploy,
            "starting orchestration run"
        );

        report.enter(Phase::Discover);
        let devices = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Self::interrupted(report)),
            devices = self.discover() => devices?,
        };
        report.devices = devices.iter().map(DeviceOutcome::new).collect();

        if devices.is_empty() {
            tracing::warn!(run_id = %report.run_id, "no devices attached, nothing to do");
            report.finish(false);
            return Ok(OrchestrationResult::Completed {
                report,
                sessions: Vec::new(),
            });
        }

        if options.push_payload {
            report.enter(Phase::PushPayload);
            let outcomes = self.push_payload_all(&devices).await;
            report.record(outcomes, |o, v| o.payload = Some(v));
            if self.cancel.is_cancelled() {
                return Ok(Self::interrupted(report));
            }
        }

        if options.deploy {
            report.enter(Phase::Deploy);
            let outcomes = self.deploy_all(&devices).await;
            report.record(outcomes, |o, v| o.deploy = Some(v));
            if self.cancel.is_cancelled() {
                return Ok(Self::interrupted(report));
            }
        }

        // Attempted on every device, including ones whose deploy failed.
        report.enter(Phase::RestartServers);
        let restarts = self.restart_all(&devices).await;
        report.record(restarts, |o, v| o.restart = Some(v));
        if self.cancel.is_cancelled() {
            return Ok(Self::interrupted(report));
        }

        report.enter(Phase::LaunchApps);
        let launches = self.launch_all(&devices).await;
        report.record(launches, |o, v| o.launch = Some(v));
        if self.cancel.is_cancelled() {
            return Ok(Self::interrupted(report));
        }

        report.enter(Phase::Settle);
        if !self.settle().await {
            return Ok(Self::interrupted(report));
        }

        report.enter(Phase::Attach);
        let attachments = self.attach_all(&devices).await;
        let mut sessions = Vec::new();
        for (outcome, attachment) in report.devices.iter_mut().zip(attachments) {
            outcome.attach = Some(attachment.outcome);
            sessions.extend(attachment.session);
        }
        if self.cancel.is_cancelled() {
            // Dropping the sessions kills their agent processes.
            drop(sessions);
            return Ok(Self::interrupted(report));
        }

        report.finish(false);
        tracing::info!(
            run_id = %report.run_id,
            verdict = ?report.verdict(),
            sessions = sessions.len(),
            "orchestration run complete"
        );
        Ok(OrchestrationResult::Completed { report, sessions })
    }

    fn interrupted(mut report: RunReport) -> OrchestrationResult {
        tracing::warn!(
            run_id = %report.run_id,
            phase = ?report.phases.last(),
            "run interrupted, skipping remaining phases"
        );
        report.finish(true);
        OrchestrationResult::Interrupted { report }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bridge", &self.bridge.name())
            .field("agent", &self.agent.name())
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
