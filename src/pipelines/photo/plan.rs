// SPDX-License-Identifier: GPL-3.0-only

//! Shot plan builder
//!
//! Turns a photo mode and its settings into the ordered list of frames the
//! orchestrator will request. Everything here is synchronous and happens
//! before any device interaction, so every [`PlanError`] reaches the caller
//! without side effects.

use super::bracketing::{exposure_offsets, focus_distances, scale_exposure_time};
use super::capture::StrategyKind;
use super::{CaptureSettings, PhotoMode, RepeatMode};
use crate::backends::camera::types::{
    CaptureCapabilities, ExposureSetting, FlashMode, FrameSpec, OutputFormat,
};
use crate::constants::MAX_REPEAT_COUNT;
use crate::errors::PlanError;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Adjustment the builder made to the requested settings
///
/// Reported back to the UI so it can correct what it shows.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanCorrection {
    FrameCountClamped { requested: u32, applied: u32 },
    /// RAW output dropped because the mode cannot produce it
    RawDropped { mode: PhotoMode },
    ExposureClamped { requested: f32, applied: f32 },
    FocusDistanceClamped { requested: f32, applied: f32 },
    FlashUnavailable { requested: FlashMode },
    /// Native acceleration missing; frames are sequenced one at a time
    FrameByFrameFallback,
}

impl std::fmt::Display for PlanCorrection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanCorrection::FrameCountClamped { requested, applied } => {
                write!(f, "Frame count {} limited to {}", requested, applied)
            }
            PlanCorrection::RawDropped { mode } => write!(f, "RAW not available in {} mode", mode),
            PlanCorrection::ExposureClamped { requested, applied } => {
                write!(f, "Exposure {:+.1} EV limited to {:+.1} EV", requested, applied)
            }
            PlanCorrection::FocusDistanceClamped { requested, applied } => {
                write!(f, "Focus distance {:.2} limited to {:.2}", requested, applied)
            }
            PlanCorrection::FlashUnavailable { requested } => {
                write!(f, "Flash mode {:?} not supported, flash off", requested)
            }
            PlanCorrection::FrameByFrameFallback => {
                write!(f, "Native bracketing unavailable, capturing frame by frame")
            }
        }
    }
}

/// Plan-wide metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ShotPlanMeta {
    pub mode: PhotoMode,
    /// `None` for unbounded plans ended by an explicit stop
    pub total_frames: Option<u32>,
    pub requires_raw: bool,
    pub requires_precapture_metering: bool,
    pub output: OutputFormat,
    /// Effective flash mode for the shot
    pub flash: FlashMode,
    pub strategy: StrategyKind,
    /// Delay between issuing consecutive frames
    pub frame_interval: Option<Duration>,
}

impl ShotPlanMeta {
    pub fn is_unbounded(&self) -> bool {
        self.total_frames.is_none()
    }
}

#[derive(Debug, Clone)]
enum FrameSource {
    Bounded(Vec<FrameSpec>),
    /// Every frame is the template with its own index
    Unbounded(FrameSpec),
}

/// Ordered frames of one shot
///
/// Immutable once built. For bounded plans `total_frames` always equals the
/// number of frames and indices run contiguously from 0.
#[derive(Debug, Clone)]
pub struct ShotPlan {
    meta: ShotPlanMeta,
    frames: FrameSource,
    corrections: Vec<PlanCorrection>,
}

impl ShotPlan {
    pub fn meta(&self) -> &ShotPlanMeta {
        &self.meta
    }

    pub fn mode(&self) -> PhotoMode {
        self.meta.mode
    }

    pub fn total_frames(&self) -> Option<u32> {
        self.meta.total_frames
    }

    pub fn is_unbounded(&self) -> bool {
        self.meta.is_unbounded()
    }

    /// Frame at `index`, generated on demand for unbounded plans
    pub fn frame(&self, index: u32) -> Option<FrameSpec> {
        match &self.frames {
            FrameSource::Bounded(frames) => frames.get(index as usize).cloned(),
            FrameSource::Unbounded(template) => Some(FrameSpec {
                frame_index: index,
                ..template.clone()
            }),
        }
    }

    /// All frames of a bounded plan
    pub fn frames(&self) -> Option<&[FrameSpec]> {
        match &self.frames {
            FrameSource::Bounded(frames) => Some(frames),
            FrameSource::Unbounded(_) => None,
        }
    }

    pub fn corrections(&self) -> &[PlanCorrection] {
        &self.corrections
    }
}

/// Build the plan for one shot
pub fn build_plan(
    mode: PhotoMode,
    settings: &CaptureSettings,
    capabilities: &CaptureCapabilities,
) -> Result<ShotPlan, PlanError> {
    let plan = PlanBuilder::new(mode, settings, capabilities)?.build()?;
    info!(
        mode = %mode,
        total_frames = ?plan.meta.total_frames,
        output = ?plan.meta.output,
        strategy = ?plan.meta.strategy,
        corrections = plan.corrections.len(),
        "Shot plan built"
    );
    Ok(plan)
}

struct PlanBuilder<'a> {
    mode: PhotoMode,
    settings: &'a CaptureSettings,
    caps: &'a CaptureCapabilities,
    output: OutputFormat,
    flash: FlashMode,
    corrections: Vec<PlanCorrection>,
}

fn positive_stops(value: f32, what: &str) -> Result<f32, PlanError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PlanError::InvalidSettings(format!(
            "{} must be a positive number of stops, got {}",
            what, value
        )))
    }
}

impl<'a> PlanBuilder<'a> {
    /// Resolve mode conflicts, output format and flash before frames exist
    fn new(
        mode: PhotoMode,
        settings: &'a CaptureSettings,
        caps: &'a CaptureCapabilities,
    ) -> Result<Self, PlanError> {
        if settings.video_recording && !mode.allowed_during_video() {
            return Err(PlanError::ConflictingMode(format!(
                "{} cannot run while video is recording",
                mode
            )));
        }

        let mut corrections = Vec::new();
        let mut output = settings.output;
        if output.includes_raw() && !mode.supports_raw() {
            if output == OutputFormat::RawOnly {
                return Err(PlanError::ConflictingMode(format!(
                    "{} cannot produce RAW-only output",
                    mode
                )));
            }
            warn!(mode = %mode, "Dropping RAW output for mode without RAW support");
            output = OutputFormat::Jpeg;
            corrections.push(PlanCorrection::RawDropped { mode });
        }
        if output.includes_raw() && !caps.supports_raw {
            return Err(PlanError::Unsupported(format!(
                "camera {} has no RAW support",
                caps.camera_id
            )));
        }

        let flash = if mode.forces_flash_off() {
            FlashMode::Off
        } else if !caps.supports_flash(settings.flash) {
            warn!(requested = ?settings.flash, "Flash mode unsupported, using off");
            corrections.push(PlanCorrection::FlashUnavailable {
                requested: settings.flash,
            });
            FlashMode::Off
        } else {
            settings.flash
        };

        Ok(Self {
            mode,
            settings,
            caps,
            output,
            flash,
            corrections,
        })
    }

    fn requires_raw(&self) -> bool {
        self.output.includes_raw()
    }

    /// Largest frame count the device allows for this shot
    fn frame_limit(&self) -> u32 {
        if self.requires_raw() {
            self.caps.max_burst_count.min(self.caps.max_raw_images)
        } else {
            self.caps.max_burst_count
        }
    }

    fn clamp_count(&mut self, requested: u32, min: u32, limit: u32) -> Result<u32, PlanError> {
        if limit < min {
            return Err(PlanError::Unsupported(format!(
                "{} needs at least {} frames, device allows {}",
                self.mode, min, limit
            )));
        }
        let applied = requested.clamp(min, limit);
        if applied != requested {
            warn!(requested, applied, mode = %self.mode, "Frame count clamped");
            self.corrections
                .push(PlanCorrection::FrameCountClamped { requested, applied });
        }
        Ok(applied)
    }

    fn exposure(&mut self, offset: f32) -> Result<ExposureSetting, PlanError> {
        if let Some(time) = self.settings.exposure_time {
            return scale_exposure_time(time, offset)
                .map(ExposureSetting::Time)
                .ok_or_else(|| {
                    PlanError::InvalidSettings(format!(
                        "exposure time {:?} at {:+} EV is out of range",
                        time, offset
                    ))
                });
        }
        let requested = self.settings.exposure_compensation + offset;
        let applied = self.caps.clamp_exposure_compensation(requested);
        if (applied - requested).abs() > f32::EPSILON {
            debug!(requested, applied, "Exposure compensation clamped");
            self.corrections
                .push(PlanCorrection::ExposureClamped { requested, applied });
        }
        Ok(ExposureSetting::Compensation(applied))
    }

    fn focus_distance(&mut self, requested: f32) -> f32 {
        let applied = requested.clamp(0.0, self.caps.min_focus_distance);
        if (applied - requested).abs() > f32::EPSILON {
            self.corrections
                .push(PlanCorrection::FocusDistanceClamped { requested, applied });
        }
        applied
    }

    fn flash_override(&self) -> Option<FlashMode> {
        if self.mode.forces_flash_off() {
            Some(FlashMode::Off)
        } else if self.flash == FlashMode::Off {
            None
        } else {
            Some(self.flash)
        }
    }

    fn spec(&self, frame_index: u32, exposure: ExposureSetting) -> FrameSpec {
        FrameSpec {
            frame_index,
            exposure,
            focus_distance: None,
            flash_override: self.flash_override(),
            is_target_infinity_focus: false,
        }
    }

    /// Strategy for modes that can use a native bracket
    fn bracket_strategy(&mut self, native: bool) -> StrategyKind {
        if native {
            StrategyKind::HardwareBurst
        } else {
            debug!(mode = %self.mode, "Native bracketing unavailable, falling back");
            self.corrections.push(PlanCorrection::FrameByFrameFallback);
            StrategyKind::FrameByFrame
        }
    }

    fn burst_strategy(&self) -> StrategyKind {
        if self.caps.hardware_burst {
            StrategyKind::HardwareBurst
        } else {
            StrategyKind::FrameByFrame
        }
    }

    fn build(mut self) -> Result<ShotPlan, PlanError> {
        let (frames, strategy, frame_interval) = match self.mode {
            PhotoMode::Single | PhotoMode::Dro => self.single_frames()?,
            PhotoMode::Hdr => {
                let stops = positive_stops(self.settings.hdr_stops, "HDR stops")?;
                self.clamp_count(3, 3, self.frame_limit())?;
                let frames = self.exposure_bracket(3, stops)?;
                let strategy = self.bracket_strategy(self.caps.native_exposure_bracketing);
                (FrameSource::Bounded(frames), strategy, None)
            }
            PhotoMode::ExpoBracketing => {
                let stops = positive_stops(self.settings.expo_bracketing_stops, "Bracketing stops")?;
                let n = self.clamp_count(self.settings.expo_bracketing_images, 2, self.frame_limit())?;
                let frames = self.exposure_bracket(n, stops)?;
                let strategy = self.bracket_strategy(self.caps.native_exposure_bracketing);
                (FrameSource::Bounded(frames), strategy, None)
            }
            PhotoMode::FocusBracketing => {
                let frames = self.focus_bracket()?;
                let strategy = self.bracket_strategy(self.caps.native_focus_bracketing);
                (FrameSource::Bounded(frames), strategy, None)
            }
            PhotoMode::FastBurst => {
                let n = self.clamp_count(self.settings.burst_images, 1, self.frame_limit())?;
                let frames = self.uniform_frames(n)?;
                (
                    FrameSource::Bounded(frames),
                    self.burst_strategy(),
                    self.settings.burst_interval,
                )
            }
            PhotoMode::NoiseReduction => {
                let n = self.clamp_count(self.settings.nr_images, 2, self.frame_limit())?;
                let frames = self.uniform_frames(n)?;
                (FrameSource::Bounded(frames), self.burst_strategy(), None)
            }
            PhotoMode::Panorama => {
                let exposure = self.exposure(0.0)?;
                (
                    FrameSource::Unbounded(self.spec(0, exposure)),
                    StrategyKind::FrameByFrame,
                    None,
                )
            }
        };

        let total_frames = match &frames {
            FrameSource::Bounded(frames) => Some(frames.len() as u32),
            FrameSource::Unbounded(_) => None,
        };

        let requires_raw = self.requires_raw();
        if requires_raw
            && let Some(total) = total_frames
            && total > self.caps.max_raw_images
        {
            return Err(PlanError::Unsupported(format!(
                "{} RAW frames exceed the device limit of {}",
                total, self.caps.max_raw_images
            )));
        }

        Ok(ShotPlan {
            meta: ShotPlanMeta {
                mode: self.mode,
                total_frames,
                requires_raw,
                requires_precapture_metering: self.flash.needs_precapture(),
                output: self.output,
                flash: self.flash,
                strategy,
                frame_interval,
            },
            frames,
            corrections: self.corrections,
        })
    }

    fn single_frames(
        &mut self,
    ) -> Result<(FrameSource, StrategyKind, Option<Duration>), PlanError> {
        let exposure = self.exposure(0.0)?;
        let interval = self.settings.repeat_interval;
        match self.settings.repeat {
            RepeatMode::Once => Ok((
                FrameSource::Bounded(vec![self.spec(0, exposure)]),
                StrategyKind::FrameByFrame,
                None,
            )),
            RepeatMode::Count(0) => Err(PlanError::InvalidSettings(
                "repeat count must be at least 1".to_string(),
            )),
            RepeatMode::Count(requested) => {
                let n = self.clamp_count(requested, 1, MAX_REPEAT_COUNT)?;
                Ok((
                    FrameSource::Bounded((0..n).map(|i| self.spec(i, exposure)).collect()),
                    StrategyKind::FrameByFrame,
                    interval,
                ))
            }
            RepeatMode::Unlimited => Ok((
                FrameSource::Unbounded(self.spec(0, exposure)),
                StrategyKind::FrameByFrame,
                interval,
            )),
        }
    }

    fn uniform_frames(&mut self, n: u32) -> Result<Vec<FrameSpec>, PlanError> {
        let exposure = self.exposure(0.0)?;
        Ok((0..n).map(|i| self.spec(i, exposure)).collect())
    }

    fn exposure_bracket(&mut self, n: u32, stops: f32) -> Result<Vec<FrameSpec>, PlanError> {
        exposure_offsets(n, stops)
            .into_iter()
            .enumerate()
            .map(|(i, offset)| {
                let exposure = self.exposure(offset)?;
                Ok(self.spec(i as u32, exposure))
            })
            .collect()
    }

    fn focus_bracket(&mut self) -> Result<Vec<FrameSpec>, PlanError> {
        if !self.caps.manual_focus {
            return Err(PlanError::Unsupported(format!(
                "camera {} has no manual focus control",
                self.caps.camera_id
            )));
        }
        let add_infinity = self.settings.focus_bracketing_add_infinity;
        let limit = self.frame_limit().saturating_sub(add_infinity as u32);
        let n = self.clamp_count(self.settings.focus_bracketing_images, 2, limit)?;
        let source = self.focus_distance(self.settings.focus_source_distance);
        let target = self.focus_distance(self.settings.focus_target_distance);
        let exposure = self.exposure(0.0)?;

        let mut frames: Vec<FrameSpec> = focus_distances(source, target, n)
            .into_iter()
            .enumerate()
            .map(|(i, distance)| FrameSpec {
                focus_distance: Some(distance),
                ..self.spec(i as u32, exposure)
            })
            .collect();

        if add_infinity {
            frames.push(FrameSpec {
                focus_distance: Some(0.0),
                is_target_infinity_focus: true,
                ..self.spec(n, exposure)
            });
        }
        Ok(frames)
    }
}
