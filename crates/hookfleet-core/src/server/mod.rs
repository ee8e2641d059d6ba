//! Instrumentation server lifecycle on a device.
//!
//! Every operation re-queries the device instead of trusting earlier
//! results: the server can crash or be killed behind our back.
//!
//! Restart sequence:
//!
//! ```text
//! find -> stop -> settle -> find (verify) -> start -> settle -> find (verify)
//! ```
//!
//! The verification queries are reported but never change the sequence:
//! start is issued even if the server still looks alive after stop.

pub mod settle;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::bridge::{Bridge, BridgeError, privileged};
use crate::outcome::StepOutcome;

pub use settle::SettleStrategy;

/// Directory on the device the server binary is pushed to.
pub const REMOTE_DIR: &str = "/data/local/tmp";

/// Observed state of the server process on one device.
///
/// `NotFound` covers both "no matching process" and "the query itself
/// failed": either way the caller has to act as if the server is down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServerProcessState {
    /// Not queried yet.
    Unknown,
    /// The process table had matching lines.
    Found { lines: String },
    NotFound,
    /// The device task died before the query returned.
    Aborted { message: String },
}

impl ServerProcessState {
    pub fn found(lines: impl Into<String>) -> Self {
        Self::Found {
            lines: lines.into(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for ServerProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("UNKNOWN"),
            Self::Found { .. } => f.write_str("FOUND"),
            Self::NotFound => f.write_str("NOT FOUND"),
            Self::Aborted { message } => write!(f, "ABORTED: {message}"),
        }
    }
}

/// Which deploy step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    Push,
    Chown,
    Chmod,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Chown => f.write_str("chown"),
            Self::Chmod => f.write_str("chmod"),
        }
    }
}

/// Deploying the server binary to one device failed.
#[derive(Debug, Error)]
#[error("deploy {step} failed on {device}: {source}")]
pub struct DeployError {
    pub device: String,
    pub step: DeployStep,
    #[source]
    pub source: BridgeError,
}

/// Everything observed during one restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    pub initial: ServerProcessState,
    pub stop: StepOutcome,
    pub after_stop: ServerProcessState,
    pub start: StepOutcome,
    pub after_start: ServerProcessState,
}

impl RestartReport {
    /// The server was seen running after the restart.
    pub fn is_running(&self) -> bool {
        self.after_start.is_found()
    }
}

/// Manages the instrumentation server binary on devices.
#[derive(Clone)]
pub struct ServerManager {
    bridge: Arc<dyn Bridge>,
    server_name: String,
    local_binary: PathBuf,
    settle: SettleStrategy,
}

impl fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerManager")
            .field("bridge", &self.bridge.name())
            .field("server_name", &self.server_name)
            .field("local_binary", &self.local_binary)
            .field("settle", &self.settle)
            .finish()
    }
}

impl ServerManager {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        server_name: impl Into<String>,
        local_binary: impl Into<PathBuf>,
        settle: SettleStrategy,
    ) -> Self {
        Self {
            bridge,
            server_name: server_name.into(),
            local_binary: local_binary.into(),
            settle,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn local_binary(&self) -> &Path {
        &self.local_binary
    }

    /// Path the binary lives at on the device.
    pub fn remote_path(&self) -> String {
        format!("{REMOTE_DIR}/{}", self.server_name)
    }

    /// Push the binary and make it root-owned and executable.
    ///
    /// Stops at the first failing step.
    pub async fn deploy(&self, device: &str) -> Result<(), DeployError> {
        let remote = self.remote_path();
        let fail = |step| {
            let device = device.to_string();
            move |source| DeployError {
                device,
                step,
                source,
            }
        };

        self.bridge
            .push(device, &self.local_binary, &remote)
            .await
            .map_err(fail(DeployStep::Push))?;

        self.bridge
            .shell(device, &privileged(&format!("chown root:root {remote}")))
            .await
            .map_err(fail(DeployStep::Chown))?;

        self.bridge
            .shell(device, &privileged(&format!("chmod 775 {remote}")))
            .await
            .map_err(fail(DeployStep::Chmod))?;

        tracing::info!(device, remote = %remote, "server binary deployed");
        Ok(())
    }

    /// Look for the server in the device's process table.
    pub async fn find(&self, device: &str) -> ServerProcessState {
        let command = format!("{} | grep {}", privileged("ps"), self.server_name);
        match self.bridge.shell(device, &command).await {
            Ok(out) => {
                let lines = matching_lines(&out.stdout, &self.server_name);
                if lines.is_empty() {
                    ServerProcessState::NotFound
                } else {
                    ServerProcessState::found(lines)
                }
            }
            Err(e) => {
                // grep exits 1 on no match, which lands here too.
                tracing::debug!(device, error = %e, "process query failed, treating as not found");
                ServerProcessState::NotFound
            }
        }
    }

    /// Launch the server detached from the shell. Does not wait for it.
    pub async fn start(&self, device: &str) -> StepOutcome {
        let command = privileged(&format!("nohup {} > /dev/null 2>&1 &", self.remote_path()));
        let result = self.bridge.shell(device, &command).await;
        StepOutcome::from_command(device, "start server", &result)
    }

    /// Signal the server to terminate. A missing process is not a failure.
    pub async fn stop(&self, device: &str) -> StepOutcome {
        let command = privileged(&format!("pkill {}", self.server_name));
        match self.bridge.shell(device, &command).await {
            Ok(_) => StepOutcome::Ok,
            // pkill exits 1 when nothing matched.
            Err(BridgeError::Exit { code: Some(1), .. }) => {
                tracing::debug!(device, "no server process to stop");
                StepOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(device, step = "stop server", error = %e, "best-effort step failed");
                StepOutcome::failed(e.to_string())
            }
        }
    }

    /// Stop, verify, start, verify.
    pub async fn restart(&self, device: &str) -> RestartReport {
        let initial = self.find(device).await;
        tracing::info!(device, state = %initial, "server state before restart");

        let stop = self.stop(device).await;

        let after_stop = self
            .settle
            .settle(|| self.find(device), ServerProcessState::is_not_found)
            .await;
        if after_stop.is_found() {
            tracing::warn!(device, "server still listed after stop, starting anyway");
        } else {
            tracing::info!(device, state = %after_stop, "server state after stop");
        }

        let start = self.start(device).await;

        let after_start = self
            .settle
            .settle(|| self.find(device), ServerProcessState::is_found)
            .await;
        if after_start.is_found() {
            tracing::info!(device, state = %after_start, "server state after start");
        } else {
            tracing::warn!(device, state = %after_start, "server not running after start");
        }

        RestartReport {
            initial,
            stop,
            after_stop,
            start,
            after_start,
        }
    }
}

/// Lines of `ps` output that mention `name`, trimmed and joined.
fn matching_lines(output: &str, name: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains(name))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_lines_filters_and_trims() {
        let ps = "  root  4242  1  srv\nshell 99 1 grep\n\n";
        assert_eq!(matching_lines(ps, "srv"), "root  4242  1  srv");
    }

    #[test]
    fn matching_lines_empty_output() {
        assert_eq!(matching_lines("", "srv"), "");
        assert_eq!(matching_lines("\n \n", "srv"), "");
    }

    #[test]
    fn state_display_matches_status_vocabulary() {
        assert_eq!(ServerProcessState::NotFound.to_string(), "NOT FOUND");
        assert_eq!(ServerProcessState::found("x").to_string(), "FOUND");
        assert_eq!(ServerProcessState::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn deploy_error_names_step_and_device() {
        let err = DeployError {
            device: "B".into(),
            step: DeployStep::Push,
            source: BridgeError::Exit {
                program: "adb".into(),
                code: Some(1),
                stderr: "no such file".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.starts_with("deploy push failed on B"), "got: {msg}");
    }
}
