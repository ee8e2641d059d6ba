//! Frida CLI adapter.
//!
//! Runs `frida -D <device> -n <app> -l <script> --no-pause`. The CLI stays
//! in the foreground for as long as the hooks are loaded, so an attach that
//! is still alive after a short grace window counts as attached.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{AgentSession, InstrumentationAgent};
use crate::bridge::BridgeError;

/// Harness for the `frida` command line tool.
#[derive(Debug, Clone)]
pub struct FridaAgent {
    frida_path: String,
    grace: Duration,
}

impl FridaAgent {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

    /// Adapter that looks for `frida` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("frida")
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            frida_path: path.into(),
            grace: Self::DEFAULT_GRACE,
        }
    }

    /// How long an attach may take to fail before it is considered live.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Command-line arguments for attaching to `target` by process name.
    pub fn attach_args(device: &str, target: &str, script: &Path) -> Vec<String> {
        vec![
            "-D".to_string(),
            device.to_string(),
            "-n".to_string(),
            target.to_string(),
            "-l".to_string(),
            script.to_string_lossy().into_owned(),
            "--no-pause".to_string(),
        ]
    }
}

impl Default for FridaAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward each output line to the log and return everything read.
///
/// Reads raw bytes until EOF. Stopping early would close the pipe and the
/// agent would die on its next write.
async fn forward_lines<R>(device: String, stream: &'static str, reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut collected = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                tracing::info!(device = %device, stream, "{line}");
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) => {
                tracing::debug!(device = %device, stream, error = %e, "agent output read failed");
                break;
            }
        }
    }
    collected
}

#[async_trait]
impl InstrumentationAgent for FridaAgent {
    fn name(&self) -> &str {
        "frida"
    }

    async fn attach(
        &self,
        device: &str,
        target: &str,
        script: &Path,
    ) -> Result<AgentSession, BridgeError> {
        let args = Self::attach_args(device, target, script);
        tracing::debug!(
            device,
            program = %self.frida_path,
            args = %args.join(" "),
            "attaching agent"
        );

        let mut child = Command::new(&self.frida_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.frida_path.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(device.to_string(), "stdout", stdout));
        }
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_lines(device.to_string(), "stderr", stderr)));

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::info!(device, target, "agent finished during grace window");
                Ok(AgentSession::finished(device, target))
            }
            Ok(Ok(status)) => {
                let stderr = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                Err(BridgeError::Exit {
                    program: self.frida_path.clone(),
                    code: status.code(),
                    stderr: stderr.trim().to_owned(),
                })
            }
            Ok(Err(source)) => Err(BridgeError::Spawn {
                program: self.frida_path.clone(),
                source,
            }),
            Err(_still_running) => {
                tracing::info!(device, target, pid = ?child.id(), "agent attached");
                Ok(AgentSession::running(device, target, child, stdin))
            }
        }
    }
}
