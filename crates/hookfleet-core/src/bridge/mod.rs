//! Remote command execution against a single device.
//!
//! The [`Bridge`] trait is the only I/O primitive the rest of the crate
//! builds on. Each call spawns exactly one external process and returns a
//! [`CommandResult`]; callers decide whether a failure matters.
//!
//! ```text
//! ServerManager / AppManager / device::discover
//!     |
//!     v
//! &dyn Bridge --shell(device, "su -c ps | grep srv")--> AdbBridge
//!                                                         |
//!                                                         v
//!                                      adb -s <device> shell "<cmd>"
//! ```

pub mod adb;
pub mod runner;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use adb::AdbBridge;
pub use runner::run_command;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

impl CommandOutput {
    /// A successful output carrying only `stdout`.
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Self::default()
        }
    }
}

/// Why a remote command did not produce a usable output.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The external program could not be started (or waited on).
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully.
    #[error("{program} exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The program did not finish inside the per-call timeout and was killed.
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// Outcome of one remote command execution.
pub type CommandResult = Result<CommandOutput, BridgeError>;

/// Executes commands against attached devices.
///
/// Implementations must not share mutable state between calls for
/// different devices: the orchestrator issues calls for many devices
/// concurrently.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Human-readable name of the bridge (e.g. "adb").
    fn name(&self) -> &str;

    /// Make sure the host-side bridge server is running.
    async fn start_server(&self) -> CommandResult;

    /// Raw listing of attached devices, one per line after a header.
    async fn list_devices(&self) -> CommandResult;

    /// Copy a local file to a path on the device.
    async fn push(&self, device: &str, local: &Path, remote: &str) -> CommandResult;

    /// Run a shell command string on the device.
    async fn shell(&self, device: &str, command: &str) -> CommandResult;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Bridge) {}
};

/// Wrap a remote command in the elevation prefix.
pub fn privileged(command: &str) -> String {
    format!("su -c {command}")
}
