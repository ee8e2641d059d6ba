//! Screen size lookup and tapping.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::bridge::Bridge;
use crate::outcome::StepOutcome;

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)x(\d+)").expect("static regex is valid"));

/// Physical screen size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// A point to tap, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapPoint {
    pub x: f64,
    pub y: f64,
}

impl fmt::Display for TapPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {:.3}", self.x, self.y)
    }
}

impl ScreenSize {
    /// Used when the device does not answer `wm size`.
    pub const FALLBACK: ScreenSize = ScreenSize {
        width: 720,
        height: 1280,
    };

    /// Relative position of the tap target.
    const TAP_X_PERCENT: f64 = 76.4;
    const TAP_Y_PERCENT: f64 = 87.5;

    /// Parse the first `<w>x<h>` pair out of `wm size` output.
    pub fn parse(output: &str) -> Option<Self> {
        let caps = SIZE_RE.captures(output)?;
        let width = caps[1].parse().ok()?;
        let height = caps[2].parse().ok()?;
        Some(Self { width, height })
    }

    pub fn tap_target(&self) -> TapPoint {
        TapPoint {
            x: f64::from(self.width) / 100.0 * Self::TAP_X_PERCENT,
            y: f64::from(self.height) / 100.0 * Self::TAP_Y_PERCENT,
        }
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Query a device's screen size, falling back to [`ScreenSize::FALLBACK`].
pub async fn query_screen_size(bridge: &dyn Bridge, device: &str) -> ScreenSize {
    match bridge.shell(device, "wm size").await {
        Ok(out) => ScreenSize::parse(&out.stdout).unwrap_or_else(|| {
            tracing::warn!(device, output = %out.stdout.trim(), "unparseable wm size output");
            ScreenSize::FALLBACK
        }),
        Err(e) => {
            tracing::warn!(device, error = %e, "screen size query failed, using fallback");
            ScreenSize::FALLBACK
        }
    }
}

/// Tap a point on the device screen. Best-effort.
pub async fn tap(bridge: &dyn Bridge, device: &str, point: TapPoint) -> StepOutcome {
    let result = bridge.shell(device, &format!("input tap {point}")).await;
    StepOutcome::from_command(device, "tap", &result)
}
