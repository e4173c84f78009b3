// SPDX-License-Identifier: GPL-3.0-only

//! Capture strategies
//!
//! How frames reach the device is decided once per plan. The orchestrator
//! only asks a strategy how many requests may be outstanding and hands it
//! one frame at a time; it never looks at the device API itself.

use super::plan::ShotPlanMeta;
use crate::backends::camera::types::{CaptureCapabilities, FrameSpec, OutputFormat};
use crate::backends::camera::{CaptureDevice, DeviceCompletion};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which strategy a plan prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    FrameByFrame,
    HardwareBurst,
}

/// Issues frame requests to a device
pub trait CaptureStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Maximum number of frames that may be outstanding at once
    fn window(&self) -> usize;

    /// Hand one frame to the device
    fn issue(
        &mut self,
        device: &dyn CaptureDevice,
        spec: &FrameSpec,
        output: OutputFormat,
        completion: DeviceCompletion,
    );
}

/// One request at a time, each waiting for the previous completion
#[derive(Debug, Default)]
pub struct FrameByFrame;

impl CaptureStrategy for FrameByFrame {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FrameByFrame
    }

    fn window(&self) -> usize {
        1
    }

    fn issue(
        &mut self,
        device: &dyn CaptureDevice,
        spec: &FrameSpec,
        output: OutputFormat,
        completion: DeviceCompletion,
    ) {
        debug!(frame = spec.frame_index, "Issuing single capture request");
        device.capture_frame(spec, output, completion);
    }
}

/// Pipelined requests into the device's burst queue
#[derive(Debug)]
pub struct HardwareBurst {
    depth: usize,
    queued: u64,
}

impl HardwareBurst {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            queued: 0,
        }
    }

    /// Requests queued so far
    pub fn queued(&self) -> u64 {
        self.queued
    }
}

impl CaptureStrategy for HardwareBurst {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HardwareBurst
    }

    fn window(&self) -> usize {
        self.depth
    }

    fn issue(
        &mut self,
        device: &dyn CaptureDevice,
        spec: &FrameSpec,
        output: OutputFormat,
        completion: DeviceCompletion,
    ) {
        self.queued += 1;
        debug!(
            frame = spec.frame_index,
            queued = self.queued,
            "Queueing burst request"
        );
        device.queue_burst_frame(spec, output, completion);
    }
}

/// Pick the strategy for a plan on a device
///
/// A plan asking for hardware burst still falls back to frame-by-frame when
/// the device has no burst pipeline.
pub fn select_strategy(
    meta: &ShotPlanMeta,
    capabilities: &CaptureCapabilities,
) -> Box<dyn CaptureStrategy> {
    match meta.strategy {
        StrategyKind::HardwareBurst if capabilities.hardware_burst => {
            Box::new(HardwareBurst::new(capabilities.burst_pipeline_depth as usize))
        }
        _ => Box::new(FrameByFrame),
    }
}
