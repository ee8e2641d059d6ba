//! Explicit result values for best-effort device operations.

use serde::Serialize;

use crate::bridge::CommandResult;

/// Result of one best-effort step (stop, start, launch, terminate, attach...).
///
/// Failures are never propagated as errors; they are recorded here so the
/// orchestrator can aggregate them per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Failed { message: String },
    /// The step was abandoned because the run was cancelled.
    Interrupted,
}

impl StepOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Collapse a command result into an outcome, logging any failure.
    pub fn from_command(device: &str, step: &str, result: &CommandResult) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => {
                tracing::warn!(device, step, error = %e, "best-effort step failed");
                Self::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeError, CommandOutput};

    #[test]
    fn successful_command_is_ok() {
        let result: CommandResult = Ok(CommandOutput::from_stdout(""));
        assert_eq!(StepOutcome::from_command("A", "launch", &result), StepOutcome::Ok);
    }

    #[test]
    fn failed_command_keeps_message() {
        let result: CommandResult = Err(BridgeError::Exit {
            program: "adb".into(),
            code: Some(1),
            stderr: "device 'A' not found".into(),
        });
        let outcome = StepOutcome::from_command("A", "launch", &result);
        match outcome {
            StepOutcome::Failed { message } => assert!(message.contains("not found")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
