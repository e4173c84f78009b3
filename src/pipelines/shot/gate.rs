// SPDX-License-Identifier: GPL-3.0-only

//! Backpressure gate
//!
//! Admission control over the save queue. The gate keeps no state of its
//! own: every decision is computed from the shared [`SaveQueue`] counters,
//! the save pipeline's own view and the in-flight counts the caller passes.

use crate::constants;
use crate::storage::{SavePipeline, SaveQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a frame was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    QueueFull,
    MemoryLow,
    RawLimitReached,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::QueueFull => write!(f, "save queue full"),
            DenyReason::MemoryLow => write!(f, "memory low"),
            DenyReason::RawLimitReached => write!(f, "RAW limit reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allow: bool,
    pub reason: Option<DenyReason>,
}

impl AdmissionDecision {
    pub fn allowed() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    pub fn denied(reason: DenyReason) -> Self {
        Self {
            allow: false,
            reason: Some(reason),
        }
    }
}

/// Gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Save units allowed queued plus in flight
    pub safe_queue_depth: usize,
    /// Unsaved payload bytes allowed
    pub max_pending_bytes: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            safe_queue_depth: constants::gate::SAFE_QUEUE_DEPTH,
            max_pending_bytes: constants::gate::MAX_PENDING_BYTES,
        }
    }
}

pub struct BackpressureGate {
    queue: SaveQueue,
    pipeline: Arc<dyn SavePipeline>,
    max_raw_images: usize,
    config: GateConfig,
}

impl BackpressureGate {
    pub fn new(
        queue: SaveQueue,
        pipeline: Arc<dyn SavePipeline>,
        max_raw_images: u32,
        config: GateConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            max_raw_images: max_raw_images as usize,
            config,
        }
    }

    /// Decide whether one more frame may be requested
    ///
    /// `pending_raw` and `pending_jpeg` count payloads of the shot that are
    /// not yet in the save queue, including the frame about to be issued.
    /// Checks run in order: RAW limit, queue depth, memory.
    pub fn admit(&self, pending_raw: usize, pending_jpeg: usize) -> AdmissionDecision {
        if pending_raw > 0 && self.queue.pending_raw() + pending_raw > self.max_raw_images {
            return AdmissionDecision::denied(DenyReason::RawLimitReached);
        }

        let depth = self.queue.pending_units().max(self.pipeline.pending_count());
        let in_flight = pending_raw.max(pending_jpeg);
        if depth + in_flight > self.config.safe_queue_depth
            || !self.pipeline.can_accept_more(pending_raw, pending_jpeg)
        {
            return AdmissionDecision::denied(DenyReason::QueueFull);
        }

        if self.queue.pending_bytes() > self.config.max_pending_bytes {
            return AdmissionDecision::denied(DenyReason::MemoryLow);
        }

        AdmissionDecision::allowed()
    }
}

impl std::fmt::Debug for BackpressureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureGate")
            .field("queue", &self.queue)
            .field("max_raw_images", &self.max_raw_images)
            .field("config", &self.config)
            .finish()
    }
}
