//! Target application launch and termination.

use std::fmt;
use std::sync::Arc;

use crate::bridge::{Bridge, BridgeError, privileged};
use crate::outcome::StepOutcome;

/// Launches and kills the target application on devices.
///
/// Both operations are best-effort and idempotent: launching a running app
/// or killing a stopped one is not an error.
#[derive(Clone)]
pub struct AppManager {
    bridge: Arc<dyn Bridge>,
    package_name: String,
    app_name: String,
}

impl fmt::Debug for AppManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppManager")
            .field("bridge", &self.bridge.name())
            .field("package_name", &self.package_name)
            .field("app_name", &self.app_name)
            .finish()
    }
}

impl AppManager {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        package_name: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            bridge,
            package_name: package_name.into(),
            app_name: app_name.into(),
        }
    }

    /// Fire one monkey launch event at the package's main activity.
    pub async fn launch(&self, device: &str) -> StepOutcome {
        let command = format!("monkey -p {} 1", self.package_name);
        let result = self.bridge.shell(device, &command).await;
        StepOutcome::from_command(device, "launch app", &result)
    }

    /// Kill the app's process by name.
    pub async fn terminate(&self, device: &str) -> StepOutcome {
        let command = privileged(&format!("pkill {}", self.app_name));
        let result = self.bridge.shell(device, &command).await;
        match result {
            Err(BridgeError::Exit { code: Some(1), .. }) => {
                tracing::debug!(device, app = %self.app_name, "app was not running");
                StepOutcome::Ok
            }
            other => StepOutcome::from_command(device, "terminate app", &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::bridge::{CommandOutput, CommandResult};

    /// Records shell commands and answers with a fixed exit code.
    struct FakeBridge {
        exit_code: i32,
        commands: Mutex<Vec<String>>,
    }

    impl FakeBridge {
        fn exiting(exit_code: i32) -> Arc<Self> {
            Arc::new(Self {
                exit_code,
                commands: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Bridge for FakeBridge {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start_server(&self) -> CommandResult {
            Ok(CommandOutput::default())
        }

        async fn list_devices(&self) -> CommandResult {
            Ok(CommandOutput::default())
        }

        async fn push(&self, _device: &str, _local: &Path, _remote: &str) -> CommandResult {
            Ok(CommandOutput::default())
        }

        async fn shell(&self, _device: &str, command: &str) -> CommandResult {
            self.commands.lock().unwrap().push(command.to_string());
            match self.exit_code {
                0 => Ok(CommandOutput::from_stdout("")),
                code => Err(BridgeError::Exit {
                    program: "adb".into(),
                    code: Some(code),
                    stderr: String::new(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn launch_fires_one_monkey_event_at_package() {
        let bridge = FakeBridge::exiting(0);
        let apps = AppManager::new(bridge.clone(), "com.example.app", "Example");

        assert_eq!(apps.launch("A").await, StepOutcome::Ok);
        assert_eq!(
            *bridge.commands.lock().unwrap(),
            vec!["monkey -p com.example.app 1"]
        );
    }

    #[tokio::test]
    async fn terminate_kills_by_display_name() {
        let bridge = FakeBridge::exiting(0);
        let apps = AppManager::new(bridge.clone(), "com.example.app", "Example");

        assert_eq!(apps.terminate("A").await, StepOutcome::Ok);
        assert_eq!(*bridge.commands.lock().unwrap(), vec!["su -c pkill Example"]);
    }

    #[tokio::test]
    async fn terminate_of_stopped_app_is_ok() {
        let apps = AppManager::new(FakeBridge::exiting(1), "com.example.app", "Example");
        assert_eq!(apps.terminate("A").await, StepOutcome::Ok);
    }

    #[tokio::test]
    async fn launch_failure_is_recorded() {
        let apps = AppManager::new(FakeBridge::exiting(252), "com.example.app", "Example");
        assert!(matches!(apps.launch("A").await, StepOutcome::Failed { .. }));
    }
}
