//! Pushing the auxiliary payload file to devices.

use std::path::Path;

use crate::bridge::Bridge;
use crate::outcome::StepOutcome;

/// Default directory the payload lands in on the device.
pub const DEFAULT_REMOTE_DIR: &str = "/sdcard/Download/";

/// Push `local` into `remote_dir` on one device. Best-effort.
pub async fn push_payload(
    bridge: &dyn Bridge,
    device: &str,
    local: &Path,
    remote_dir: &str,
) -> StepOutcome {
    let result = bridge.push(device, local, remote_dir).await;
    if result.is_ok() {
        tracing::info!(device, file = %local.display(), remote_dir, "payload pushed");
    }
    StepOutcome::from_command(device, "push payload", &result)
}
