//! Validated run configuration.
//!
//! Built once at startup and checked before any device is touched. After
//! that it is shared read-only by every device pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agent::FridaAgent;
use crate::bridge::AdbBridge;
use crate::payload;
use crate::server::SettleStrategy;

/// Environment variable holding the application display name.
pub const APP_NAME_VAR: &str = "APP_NAME";
/// Environment variable holding the package identifier.
pub const PACKAGE_NAME_VAR: &str = "PACKAGE_NAME";
/// Environment variable holding the deployed server binary name.
pub const SERVER_NAME_VAR: &str = "LOCAL_FRIDA_SERVER_NAME";

/// Characters allowed in names that end up inside remote shell strings.
fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '+')
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing {name}: set {var} or add it to the [target] table of the config file")]
    Missing {
        name: &'static str,
        var: &'static str,
    },

    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("{name} {value:?} contains characters that are not safe in a remote shell command")]
    UnsafeName { name: &'static str, value: String },

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// The three names identifying what to instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetNames {
    /// Process name the agent attaches to.
    pub app_name: String,
    /// Package identifier used to launch the app.
    pub package_name: String,
    /// File name of the server binary on the device.
    pub server_name: String,
}

impl TargetNames {
    /// Read the names through `lookup` (usually the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str, var: &'static str| {
            lookup(var).ok_or(ConfigError::Missing { name, var })
        };
        Ok(Self {
            app_name: get("application name", APP_NAME_VAR)?,
            package_name: get("package name", PACKAGE_NAME_VAR)?,
            server_name: get("server name", SERVER_NAME_VAR)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name("application name", &self.app_name)?;
        check_name("package name", &self.package_name)?;
        check_name("server name", &self.server_name)?;
        Ok(())
    }
}

fn check_name(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty { name });
    }
    if !value.chars().all(is_shell_safe) {
        return Err(ConfigError::UnsafeName {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// External programs the run shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub adb: String,
    pub agent: String,
}

impl ToolPaths {
    pub const DEFAULT_ADB: &str = "./platform-tools/adb";
    pub const DEFAULT_AGENT: &str = "frida";
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            adb: Self::DEFAULT_ADB.to_string(),
            agent: Self::DEFAULT_AGENT.to_string(),
        }
    }
}

/// Local files pushed to or loaded onto devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub server_binary: PathBuf,
    pub hook_script: PathBuf,
    pub payload: PathBuf,
    pub payload_remote_dir: String,
}

impl Artifacts {
    pub const DEFAULT_SERVER_BINARY: &str = "./etc/frida-server-15.1.14-android-arm";
    pub const DEFAULT_HOOK_SCRIPT: &str = "./etc/frida-script-targeted.js";
    pub const DEFAULT_PAYLOAD: &str = "./etc/file.name";
}

impl Default for Artifacts {
    fn default() -> Self {
        Self {
            server_binary: PathBuf::from(Self::DEFAULT_SERVER_BINARY),
            hook_script: PathBuf::from(Self::DEFAULT_HOOK_SCRIPT),
            payload: PathBuf::from(Self::DEFAULT_PAYLOAD),
            payload_remote_dir: payload::DEFAULT_REMOTE_DIR.to_string(),
        }
    }
}

/// Timeouts and settle delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Upper bound on any single bridge command.
    pub command_timeout: Duration,
    /// Wait policy between restart steps.
    pub restart_settle: SettleStrategy,
    /// Blind wait between launching apps and attaching.
    pub launch_settle: Duration,
    /// How long an attach may take to fail before it counts as live.
    pub attach_grace: Duration,
}

impl Timing {
    pub const DEFAULT_LAUNCH_SETTLE: Duration = Duration::from_secs(5);

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "command timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let SettleStrategy::Poll { interval, timeout } = self.restart_settle {
            if interval.is_zero() {
                return Err(ConfigError::Invalid {
                    name: "poll interval",
                    reason: "must be greater than zero".to_string(),
                });
            }
            if interval > timeout {
                return Err(ConfigError::Invalid {
                    name: "poll interval",
                    reason: format!("{interval:?} is longer than the settle window {timeout:?}"),
                });
            }
        }
        Ok(())
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            command_timeout: AdbBridge::DEFAULT_TIMEOUT,
            restart_settle: SettleStrategy::default(),
            launch_settle: Self::DEFAULT_LAUNCH_SETTLE,
            attach_grace: FridaAgent::DEFAULT_GRACE,
        }
    }
}

/// Static configuration of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub target: TargetNames,
    pub tools: ToolPaths,
    pub artifacts: Artifacts,
    pub timing: Timing,
}

impl RunConfig {
    /// Configuration with default tools, artifacts and timing.
    pub fn new(target: TargetNames) -> Self {
        Self {
            target,
            tools: ToolPaths::default(),
            artifacts: Artifacts::default(),
            timing: Timing::default(),
        }
    }

    /// Read target names from the environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::new(TargetNames::from_env()?);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        if self.tools.adb.trim().is_empty() {
            return Err(ConfigError::Empty { name: "adb path" });
        }
        if self.tools.agent.trim().is_empty() {
            return Err(ConfigError::Empty { name: "agent path" });
        }
        if self.artifacts.payload_remote_dir.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: "payload remote directory",
            });
        }
        self.timing.validate()
    }
}
