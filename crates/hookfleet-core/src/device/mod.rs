//! Device discovery.
//!
//! Asks the bridge for the attached devices and turns its listing into an
//! ordered set of [`Device`] records that stay fixed for the whole run.

pub mod screen;

use serde::Serialize;
use thiserror::Error;

use crate::bridge::{Bridge, BridgeError};

pub use screen::{ScreenSize, TapPoint};

/// Failure to enumerate devices. Fatal for a run.
#[derive(Debug, Error)]
#[error("failed to list attached devices via {bridge}: {source}")]
pub struct DiscoveryError {
    pub bridge: String,
    #[source]
    pub source: BridgeError,
}

/// An attached device as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Opaque identifier (serial) used to scope every bridge command.
    pub id: String,
    /// State column of the listing (`device`, `unauthorized`, `offline`...).
    pub state: String,
    /// Screen size, when it has been queried.
    pub screen: Option<ScreenSize>,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: "device".to_string(),
            screen: None,
        }
    }

    /// Whether the bridge reports the device as ready for commands.
    pub fn is_ready(&self) -> bool {
        self.state == "device"
    }
}

/// Parse `adb devices` output into `(id, state)` pairs.
///
/// Skips the header, daemon start-up notices and blank lines. Only the first
/// two columns are read; trailing metadata such as `model:` is ignored.
pub fn parse_device_entries(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.to_lowercase().starts_with("list of devices"))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let id = columns.next()?.to_string();
            let state = columns.next().unwrap_or("unknown").to_string();
            Some((id, state))
        })
        .collect()
}

/// Parse `adb devices` output into device identifiers, in listing order.
pub fn parse_device_list(output: &str) -> Vec<String> {
    parse_device_entries(output)
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Discover the currently attached devices.
///
/// Starts the bridge server first; a failure there is only logged because
/// the listing itself will report the real problem. Returns an empty list
/// (not an error) when nothing is attached.
pub async fn discover(bridge: &dyn Bridge) -> Result<Vec<Device>, DiscoveryError> {
    if let Err(e) = bridge.start_server().await {
        tracing::warn!(bridge = bridge.name(), error = %e, "failed to start bridge server");
    }

    let output = bridge.list_devices().await.map_err(|source| DiscoveryError {
        bridge: bridge.name().to_string(),
        source,
    })?;

    let devices: Vec<Device> = parse_device_entries(&output.stdout)
        .into_iter()
        .map(|(id, state)| Device {
            id,
            state,
            screen: None,
        })
        .collect();

    for device in devices.iter().filter(|d| !d.is_ready()) {
        tracing::warn!(
            device = %device.id,
            state = %device.state,
            "device is attached but not ready; commands will likely fail"
        );
    }

    tracing::info!(count = devices.len(), "discovered devices");
    Ok(devices)
}
