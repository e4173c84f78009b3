// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Default number of frames in an exposure bracket
pub const DEFAULT_EXPO_BRACKETING_IMAGES: u32 = 3;

/// Default stop interval between bracketed exposures
pub const DEFAULT_EXPO_BRACKETING_STOPS: f32 = 2.0;

/// Default stop interval of the three HDR frames
pub const DEFAULT_HDR_STOPS: f32 = 2.0;

pub const DEFAULT_FOCUS_BRACKETING_IMAGES: u32 = 3;

pub const DEFAULT_BURST_IMAGES: u32 = 5;

/// Frames stacked for noise reduction
pub const DEFAULT_NR_IMAGES: u32 = 8;

/// Upper bound on a counted repeat; longer series should use unlimited repeat
pub const MAX_REPEAT_COUNT: u32 = 1000;

/// Orchestrator timing defaults
pub mod timing {
    use super::Duration;

    /// Wait for an autofocus result before retrying
    pub const FOCUS_TIMEOUT: Duration = Duration::from_secs(3);

    /// Wait for precapture metering to converge before retrying
    pub const METERING_TIMEOUT: Duration = Duration::from_secs(3);

    /// Interval between admission checks while paused
    pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Longest a shot may stay paused before it fails
    pub const MAX_PAUSE: Duration = Duration::from_secs(30);
}

/// Backpressure gate defaults
pub mod gate {
    /// Save units allowed in the queue (pending + in flight)
    pub const SAFE_QUEUE_DEPTH: usize = 8;

    /// Bytes of unsaved payloads allowed before admission is denied
    pub const MAX_PENDING_BYTES: u64 = 512 * 1024 * 1024;
}

/// Output file naming
pub mod file_formats {
    pub const JPEG_EXTENSION: &str = "jpg";
    pub const RAW_EXTENSION: &str = "raw";
    pub const BITMAP_EXTENSION: &str = "rgba";

    /// Timestamp layout used as file name prefix
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";
}

/// Application information utilities
pub mod app_info {
    pub const APP_ID: &str = "camera-shot";

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_defaults_are_usable() {
        assert!(DEFAULT_EXPO_BRACKETING_IMAGES >= 2);
        assert!(DEFAULT_FOCUS_BRACKETING_IMAGES >= 2);
        assert!(DEFAULT_NR_IMAGES >= 2);
        assert!(DEFAULT_EXPO_BRACKETING_STOPS > 0.0);
    }

    #[test]
    fn test_pause_poll_shorter_than_max_pause() {
        assert!(timing::PAUSE_POLL_INTERVAL < timing::MAX_PAUSE);
    }
}
