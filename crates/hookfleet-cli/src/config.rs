//! Configuration file management for hookfleet.
//!
//! Provides a TOML config file at `~/.config/hookfleet/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use hookfleet_core::config::{
    APP_NAME_VAR, Artifacts, PACKAGE_NAME_VAR, RunConfig, SERVER_NAME_VAR, TargetNames, Timing,
    ToolPaths,
};
use hookfleet_core::server::SettleStrategy;

/// Environment variable overriding the adb binary.
pub const ADB_VAR: &str = "HOOKFLEET_ADB";
/// Environment variable overriding the instrumentation agent binary.
pub const AGENT_VAR: &str = "HOOKFLEET_AGENT";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub target: TargetSection,
    pub tools: ToolsSection,
    pub artifacts: ArtifactsSection,
    pub timing: TimingSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    pub app_name: Option<String>,
    pub package_name: Option<String>,
    pub server_name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub adb: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsSection {
    pub server_binary: Option<PathBuf>,
    pub hook_script: Option<PathBuf>,
    pub payload: Option<PathBuf>,
    pub payload_remote_dir: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub command_timeout_secs: Option<u64>,
    pub restart_settle_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub blind_settle: Option<bool>,
    pub launch_settle_secs: Option<u64>,
    pub attach_grace_secs: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the hookfleet config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/hookfleet` or
/// `~/.config/hookfleet`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("hookfleet");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("hookfleet")
}

/// Return the path to the hookfleet config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Load the config file for this invocation.
///
/// An explicit `--config` path must exist; the default path is optional.
pub fn load_for(explicit: Option<&Path>) -> Result<Option<ConfigFile>> {
    match explicit {
        Some(path) => load_config(path).map(Some),
        None => {
            let path = config_path();
            if path.exists() {
                load_config(&path).map(Some)
            } else {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(None)
            }
        }
    }
}

/// Default config file contents, with comments.
pub fn default_config_template() -> String {
    let timing = Timing::default();
    format!(
        r#"# hookfleet configuration.
#
# Environment variables and command-line flags override these values.

[target]
# Process name the agent attaches to (or set {APP_NAME_VAR}).
# app_name = "Example"
# Package identifier used to launch the app (or set {PACKAGE_NAME_VAR}).
# package_name = "com.example.app"
# File name of the server binary on the device (or set {SERVER_NAME_VAR}).
# server_name = "frida-server"

[tools]
adb = "{adb}"
agent = "{agent}"

[artifacts]
server_binary = "{server_binary}"
hook_script = "{hook_script}"
payload = "{payload}"
payload_remote_dir = "{payload_remote_dir}"

[timing]
command_timeout_secs = {command_timeout}
# Upper bound on each wait during a server restart.
restart_settle_secs = {restart_settle}
poll_interval_secs = {poll_interval}
# Wait the whole window instead of polling.
blind_settle = false
launch_settle_secs = {launch_settle}
attach_grace_secs = {attach_grace}
"#,
        adb = ToolPaths::DEFAULT_ADB,
        agent = ToolPaths::DEFAULT_AGENT,
        server_binary = Artifacts::DEFAULT_SERVER_BINARY,
        hook_script = Artifacts::DEFAULT_HOOK_SCRIPT,
        payload = Artifacts::DEFAULT_PAYLOAD,
        payload_remote_dir = hookfleet_core::payload::DEFAULT_REMOTE_DIR,
        command_timeout = timing.command_timeout.as_secs(),
        restart_settle = SettleStrategy::DEFAULT_WINDOW.as_secs(),
        poll_interval = SettleStrategy::DEFAULT_INTERVAL.as_secs(),
        launch_settle = timing.launch_settle.as_secs(),
        attach_grace = timing.attach_grace.as_secs(),
    )
}

/// Write the default config file, creating parent dirs as needed.
pub fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    std::fs::write(path, default_config_template())
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values that can come from command-line flags.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub adb: Option<String>,
    pub agent: Option<String>,
    pub timeout_secs: Option<u64>,
    pub settle_secs: Option<u64>,
    pub launch_settle_secs: Option<u64>,
    pub blind_settle: bool,
}

/// Resolve the bridge and agent paths: flag > env > file > default.
pub fn resolve_tools(
    file: Option<&ConfigFile>,
    env: &impl Fn(&str) -> Option<String>,
    cli: &Overrides,
) -> ToolPaths {
    let file_tools = file.map(|f| &f.tools);
    ToolPaths {
        adb: cli
            .adb
            .clone()
            .or_else(|| env(ADB_VAR))
            .or_else(|| file_tools.and_then(|t| t.adb.clone()))
            .unwrap_or_else(|| ToolPaths::DEFAULT_ADB.to_string()),
        agent: cli
            .agent
            .clone()
            .or_else(|| env(AGENT_VAR))
            .or_else(|| file_tools.and_then(|t| t.agent.clone()))
            .unwrap_or_else(|| ToolPaths::DEFAULT_AGENT.to_string()),
    }
}

/// Per-call command timeout: flag > file > default.
pub fn resolve_command_timeout(file: Option<&ConfigFile>, cli: &Overrides) -> Duration {
    cli.timeout_secs
        .or_else(|| file.and_then(|f| f.timing.command_timeout_secs))
        .map(Duration::from_secs)
        .unwrap_or_else(|| Timing::default().command_timeout)
}

/// Build a validated [`RunConfig`] from the file, an env lookup and flags.
pub fn resolve_from(
    file: Option<&ConfigFile>,
    env: impl Fn(&str) -> Option<String>,
    cli: &Overrides,
) -> Result<RunConfig> {
    let file_target = file.map(|f| &f.target);
    let target = TargetNames::from_lookup(|var| {
        env(var).or_else(|| {
            let section = file_target?;
            match var {
                APP_NAME_VAR => section.app_name.clone(),
                PACKAGE_NAME_VAR => section.package_name.clone(),
                SERVER_NAME_VAR => section.server_name.clone(),
                _ => None,
            }
        })
    })?;

    let tools = resolve_tools(file, &env, cli);

    let defaults = Artifacts::default();
    let artifacts = match file.map(|f| &f.artifacts) {
        Some(section) => Artifacts {
            server_binary: section.server_binary.clone().unwrap_or(defaults.server_binary),
            hook_script: section.hook_script.clone().unwrap_or(defaults.hook_script),
            payload: section.payload.clone().unwrap_or(defaults.payload),
            payload_remote_dir: section
                .payload_remote_dir
                .clone()
                .unwrap_or(defaults.payload_remote_dir),
        },
        None => defaults,
    };

    let file_timing = file.map(|f| &f.timing);
    let from_file = |pick: fn(&TimingSection) -> Option<u64>| file_timing.and_then(pick);
    let defaults = Timing::default();

    let window = cli
        .settle_secs
        .or_else(|| from_file(|t| t.restart_settle_secs))
        .map(Duration::from_secs)
        .unwrap_or(SettleStrategy::DEFAULT_WINDOW);
    let interval = from_file(|t| t.poll_interval_secs)
        .map(Duration::from_secs)
        .unwrap_or(SettleStrategy::DEFAULT_INTERVAL);
    let blind = cli.blind_settle || file_timing.and_then(|t| t.blind_settle).unwrap_or(false);

    let timing = Timing {
        command_timeout: resolve_command_timeout(file, cli),
        restart_settle: if blind {
            SettleStrategy::fixed(window)
        } else {
            SettleStrategy::poll(interval, window)
        },
        launch_settle: cli
            .launch_settle_secs
            .or_else(|| from_file(|t| t.launch_settle_secs))
            .map(Duration::from_secs)
            .unwrap_or(defaults.launch_settle),
        attach_grace: from_file(|t| t.attach_grace_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.attach_grace),
    };

    let config = RunConfig {
        target,
        tools,
        artifacts,
        timing,
    };
    config.validate()?;
    Ok(config)
}

/// Resolve using the real environment and the config file.
pub fn resolve(explicit_path: Option<&Path>, cli: &Overrides) -> Result<RunConfig> {
    let file = load_for(explicit_path)?;
    resolve_from(file.as_ref(), |var| std::env::var(var).ok(), cli)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
