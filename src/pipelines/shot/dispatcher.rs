// SPDX-License-Identifier: GPL-3.0-only

//! Result dispatcher
//!
//! Collects frame payloads from the device, pairs RAW and JPEG outputs of the
//! same frame into one delivery unit and releases units to the save pipeline
//! in strictly increasing frame order.

use super::reorder::ReorderBuffer;
use crate::backends::camera::types::{CaptureResult, FramePayload, OutputFormat};
use crate::pipelines::photo::ShotPlanMeta;
use crate::storage::{SavePipeline, SaveQueue, SaveRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a single dispatch call achieved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Frame whose delivery unit became complete with this result
    pub frame_complete: Option<u32>,
    /// Frames handed to the save pipeline, in order
    pub released: Vec<u32>,
}

pub struct ResultDispatcher {
    shot_id: Uuid,
    queue: SaveQueue,
    pipeline: Arc<dyn SavePipeline>,
    partial: HashMap<u32, SaveRequest>,
    reorder: ReorderBuffer<SaveRequest>,
    delivered: u32,
}

fn is_complete(unit: &SaveRequest, output: OutputFormat) -> bool {
    let jpeg_ok = !output.includes_jpeg() || unit.jpeg.is_some() || unit.bitmap.is_some();
    let raw_ok = !output.includes_raw() || unit.raw.is_some();
    jpeg_ok && raw_ok
}

impl ResultDispatcher {
    pub fn new(shot_id: Uuid, queue: SaveQueue, pipeline: Arc<dyn SavePipeline>) -> Self {
        Self {
            shot_id,
            queue,
            pipeline,
            partial: HashMap::new(),
            reorder: ReorderBuffer::new(),
            delivered: 0,
        }
    }

    /// Frames handed to the save pipeline so far
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    /// Complete units waiting for an earlier frame
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    /// Accept one payload
    ///
    /// The result is moved into a delivery unit; once the unit is complete
    /// and every earlier frame has been released it goes to the save
    /// pipeline, after the queue counters have been bumped.
    pub fn dispatch(&mut self, result: CaptureResult, meta: &ShotPlanMeta) -> DispatchOutcome {
        let frame_index = result.frame_index;
        let unit = self
            .partial
            .entry(frame_index)
            .or_insert_with(|| SaveRequest {
                shot_id: self.shot_id,
                frame_index,
                total_frames: meta.total_frames,
                jpeg: None,
                raw: None,
                bitmap: None,
                capture_timestamp: result.capture_timestamp,
            });

        let replaced = match result.payload {
            FramePayload::Jpeg(bytes) => unit.jpeg.replace(bytes).is_some(),
            FramePayload::Raw(raw) => unit.raw.replace(raw).is_some(),
            FramePayload::Bitmap(bitmap) => unit.bitmap.replace(bitmap).is_some(),
        };
        if replaced {
            warn!(frame = frame_index, "Duplicate payload replaced");
        }

        if !is_complete(unit, meta.output) {
            debug!(frame = frame_index, "Waiting for companion payload");
            return DispatchOutcome::default();
        }

        let Some(unit) = self.partial.remove(&frame_index) else {
            return DispatchOutcome::default();
        };
        let mut outcome = DispatchOutcome {
            frame_complete: Some(frame_index),
            released: Vec::new(),
        };
        for (index, unit) in self.reorder.insert(frame_index, unit) {
            self.queue.enqueued(&unit);
            self.pipeline.enqueue(unit);
            self.delivered += 1;
            outcome.released.push(index);
        }
        if outcome.released.is_empty() {
            debug!(
                frame = frame_index,
                next = self.reorder.next_expected(),
                "Frame held for ordering"
            );
        }
        outcome
    }

    /// Drop a half-received unit before its frame is retried
    pub fn discard_frame(&mut self, frame_index: u32) {
        if self.partial.remove(&frame_index).is_some() {
            debug!(frame = frame_index, "Discarded partial unit");
        }
    }

    /// Drop everything not yet handed to the save pipeline
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.partial.len() + self.reorder.clear();
        self.partial.clear();
        if dropped > 0 {
            debug!(dropped, "Discarded undelivered frames");
        }
        dropped
    }
}
