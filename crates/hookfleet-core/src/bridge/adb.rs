//! `adb` implementation of [`Bridge`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::{Bridge, CommandResult, run_command};

/// Bridge that shells out to the Android Debug Bridge binary.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: String,
    command_timeout: Duration,
}

impl AdbBridge {
    /// Default per-call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a bridge that runs the `adb` binary at `adb_path`.
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            command_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    /// Arguments for `adb -s <device> shell "<command>"`.
    ///
    /// The whole command is passed as one argument so the device-side shell
    /// interprets pipes and redirections.
    pub fn shell_args(device: &str, command: &str) -> Vec<String> {
        vec![
            "-s".to_string(),
            device.to_string(),
            "shell".to_string(),
            command.to_string(),
        ]
    }

    /// Arguments for `adb -s <device> push <local> <remote>`.
    pub fn push_args(device: &str, local: &Path, remote: &str) -> Vec<String> {
        vec![
            "-s".to_string(),
            device.to_string(),
            "push".to_string(),
            local.to_string_lossy().into_owned(),
            remote.to_string(),
        ]
    }

    async fn adb(&self, args: Vec<String>) -> CommandResult {
        run_command(&self.adb_path, &args, self.command_timeout).await
    }
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new("adb")
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    fn name(&self) -> &str {
        "adb"
    }

    async fn start_server(&self) -> CommandResult {
        self.adb(vec!["start-server".to_string()]).await
    }

    async fn list_devices(&self) -> CommandResult {
        self.adb(vec!["devices".to_string()]).await
    }

    async fn push(&self, device: &str, local: &Path, remote: &str) -> CommandResult {
        self.adb(Self::push_args(device, local, remote)).await
    }

    async fn shell(&self, device: &str, command: &str) -> CommandResult {
        self.adb(Self::shell_args(device, command)).await
    }
}
