//! Instrumentation agent attachment.
//!
//! An [`InstrumentationAgent`] attaches an external runtime to an already
//! running application on a device and loads the hook script into it. The
//! script itself is opaque here.

pub mod frida;

use std::fmt;
use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin};

use crate::bridge::BridgeError;

pub use frida::FridaAgent;

/// Adapter interface for instrumentation runtimes.
#[async_trait]
pub trait InstrumentationAgent: Send + Sync {
    /// Human-readable name (e.g. "frida").
    fn name(&self) -> &str;

    /// Attach to the process named `target` on `device` and load `script`.
    ///
    /// The target must already be running; it is not spawned or suspended.
    async fn attach(
        &self,
        device: &str,
        target: &str,
        script: &Path,
    ) -> Result<AgentSession, BridgeError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn InstrumentationAgent) {}
};

/// A live (or already finished) attachment on one device.
///
/// Dropping a session with a running process kills it.
pub struct AgentSession {
    pub device: String,
    pub target: String,
    process: Option<AgentProcess>,
}

struct AgentProcess {
    child: Child,
    /// Held open so an interactive agent does not see EOF and quit.
    _stdin: Option<ChildStdin>,
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("device", &self.device)
            .field("target", &self.target)
            .field("pid", &self.process.as_ref().and_then(|p| p.child.id()))
            .finish()
    }
}

impl AgentSession {
    /// A session with no process behind it.
    pub fn finished(device: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            target: target.into(),
            process: None,
        }
    }

    pub(crate) fn running(
        device: impl Into<String>,
        target: impl Into<String>,
        child: Child,
        stdin: Option<ChildStdin>,
    ) -> Self {
        Self {
            device: device.into(),
            target: target.into(),
            process: Some(AgentProcess {
                child,
                _stdin: stdin,
            }),
        }
    }

    /// Whether the agent process is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(p) => matches!(p.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Wait for the agent process to exit on its own.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        let process = self.process.as_mut()?;
        process.child.wait().await.ok()
    }

    /// Kill the agent process, detaching from the target.
    pub async fn detach(mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.child.kill().await {
                tracing::debug!(device = %self.device, error = %e, "agent already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_session_is_not_running() {
        let mut session = AgentSession::finished("A", "Example");
        assert!(!session.is_running());
        assert_eq!(session.target, "Example");
    }

    #[tokio::test]
    async fn wait_on_finished_session_returns_none() {
        let mut session = AgentSession::finished("A", "Example");
        assert!(session.wait().await.is_none());
        session.detach().await;
    }

    #[tokio::test]
    async fn detach_kills_running_process() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("sleep should spawn");
        let mut session = AgentSession::running("A", "Example", child, None);
        assert!(session.is_running());
        session.detach().await;
    }
}
