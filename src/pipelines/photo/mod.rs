// SPDX-License-Identifier: GPL-3.0-only

//! Photo modes, capture settings and shot planning
//!
//! A shot request is turned into a [`ShotPlan`] before the device is touched:
//!
//! ```text
//! PhotoMode + CaptureSettings + CaptureCapabilities
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ build_plan       │  ← conflicts, clamping, flash rules, RAW limits
//! └──────────────────┘
//!        │
//!        ▼
//! ShotPlan (ordered FrameSpecs or lazy unbounded source)
//!        │
//!        ▼
//! CaptureStrategy (frame-by-frame or hardware burst)
//! ```

pub mod bracketing;
pub mod capture;
pub mod plan;

pub use capture::{CaptureStrategy, FrameByFrame, HardwareBurst, StrategyKind, select_strategy};
pub use plan::{PlanCorrection, ShotPlan, ShotPlanMeta, build_plan};

use crate::backends::camera::types::{FlashMode, OutputFormat};
use crate::constants;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Composite capture mode of a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhotoMode {
    #[default]
    Single,
    /// Dynamic range optimisation (single frame, tone mapped later)
    Dro,
    /// Three-frame exposure bracket for HDR fusion
    Hdr,
    Panorama,
    ExpoBracketing,
    FocusBracketing,
    FastBurst,
    NoiseReduction,
}

impl PhotoMode {
    pub const ALL: [PhotoMode; 8] = [
        PhotoMode::Single,
        PhotoMode::Dro,
        PhotoMode::Hdr,
        PhotoMode::Panorama,
        PhotoMode::ExpoBracketing,
        PhotoMode::FocusBracketing,
        PhotoMode::FastBurst,
        PhotoMode::NoiseReduction,
    ];

    /// Modes whose shot is made of several frames of one bracket or burst
    pub fn is_multi_frame(&self) -> bool {
        matches!(
            self,
            PhotoMode::Hdr
                | PhotoMode::ExpoBracketing
                | PhotoMode::FocusBracketing
                | PhotoMode::FastBurst
                | PhotoMode::NoiseReduction
        )
    }

    /// Modes that can save RAW alongside (or instead of) JPEG
    pub fn supports_raw(&self) -> bool {
        matches!(
            self,
            PhotoMode::Single | PhotoMode::Dro | PhotoMode::ExpoBracketing | PhotoMode::FocusBracketing
        )
    }

    /// Only plain stills can be taken while video is recording
    pub fn allowed_during_video(&self) -> bool {
        *self == PhotoMode::Single
    }

    /// Flash is forced off for multi-frame fusion and panorama
    pub fn forces_flash_off(&self) -> bool {
        self.is_multi_frame() || *self == PhotoMode::Panorama
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PhotoMode::Single => "Photo",
            PhotoMode::Dro => "DRO",
            PhotoMode::Hdr => "HDR",
            PhotoMode::Panorama => "Panorama",
            PhotoMode::ExpoBracketing => "Exposure bracketing",
            PhotoMode::FocusBracketing => "Focus bracketing",
            PhotoMode::FastBurst => "Fast burst",
            PhotoMode::NoiseReduction => "Noise reduction",
        }
    }
}

impl std::fmt::Display for PhotoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How many times a single-frame shot repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatMode {
    #[default]
    Once,
    Count(u32),
    /// Repeat until stopped
    Unlimited,
}

/// Per-shot capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Base exposure compensation in EV
    pub exposure_compensation: f32,
    /// Manual exposure time; bracketing scales it instead of compensating
    pub exposure_time: Option<Duration>,
    pub expo_bracketing_images: u32,
    /// Stop interval between bracketed exposures
    pub expo_bracketing_stops: f32,
    pub hdr_stops: f32,
    pub focus_bracketing_images: u32,
    /// Diopters (0 = infinity)
    pub focus_source_distance: f32,
    /// Diopters (0 = infinity)
    pub focus_target_distance: f32,
    pub focus_bracketing_add_infinity: bool,
    pub burst_images: u32,
    pub burst_interval: Option<Duration>,
    pub nr_images: u32,
    pub repeat: RepeatMode,
    pub repeat_interval: Option<Duration>,
    pub flash: FlashMode,
    pub output: OutputFormat,
    /// Video recording is active on the device
    pub video_recording: bool,
    /// Run autofocus before the first frame
    pub startup_focus: bool,
    /// Focus already locked by the user; skip the scan
    pub focus_locked: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            exposure_compensation: 0.0,
            exposure_time: None,
            expo_bracketing_images: constants::DEFAULT_EXPO_BRACKETING_IMAGES,
            expo_bracketing_stops: constants::DEFAULT_EXPO_BRACKETING_STOPS,
            hdr_stops: constants::DEFAULT_HDR_STOPS,
            focus_bracketing_images: constants::DEFAULT_FOCUS_BRACKETING_IMAGES,
            focus_source_distance: 0.0,
            focus_target_distance: 0.0,
            focus_bracketing_add_infinity: false,
            burst_images: constants::DEFAULT_BURST_IMAGES,
            burst_interval: None,
            nr_images: constants::DEFAULT_NR_IMAGES,
            repeat: RepeatMode::Once,
            repeat_interval: None,
            flash: FlashMode::Off,
            output: OutputFormat::Jpeg,
            video_recording: false,
            startup_focus: true,
            focus_locked: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_capable_modes() {
        let raw: Vec<PhotoMode> = PhotoMode::ALL
            .into_iter()
            .filter(|m| m.supports_raw())
            .collect();
        assert_eq!(
            raw,
            vec![
                PhotoMode::Single,
                PhotoMode::Dro,
                PhotoMode::ExpoBracketing,
                PhotoMode::FocusBracketing
            ]
        );
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: CaptureSettings =
            serde_json::from_str(r#"{"expo_bracketing_images": 5, "flash": "auto"}"#).unwrap();
        assert_eq!(settings.expo_bracketing_images, 5);
        assert_eq!(settings.flash, FlashMode::Auto);
        assert_eq!(settings.nr_images, constants::DEFAULT_NR_IMAGES);
        assert!(settings.startup_focus);
    }
}
