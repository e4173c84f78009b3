// SPDX-License-Identifier: GPL-3.0-only

//! Camera device abstraction
//!
//! The orchestrator only talks to a device through the [`CaptureDevice`]
//! trait. Device operations return immediately; their results arrive later
//! through a [`DeviceCompletion`] handle which posts into the shot's inbox.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Shot Orchestrator  │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    DeviceManager    │  ← Active device, cached capability snapshot
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureDevice Trait │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!   ┌──────┐ ┌───────────┐
//!   │Legacy│ │RequestBased│ ← Capability sets differ per API
//!   └──────┘ └───────────┘
//! ```

pub mod manager;
pub mod types;

pub use manager::DeviceManager;
pub use types::*;

use std::sync::Arc;
use tracing::debug;

/// Asynchronous device callback delivered to the shot that issued the request
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Focus(Result<FocusOutcome, DeviceFailure>),
    Metering(Result<(), DeviceFailure>),
    Frame {
        frame_index: u32,
        outcome: Result<CaptureResult, DeviceFailure>,
    },
}

type CompletionSink = dyn Fn(DeviceEvent) -> bool + Send + Sync;

/// Handle a device uses to report completion of a request
///
/// Cloning is cheap. Once the shot that created the handle has finished or
/// been cancelled, reports are silently discarded.
#[derive(Clone)]
pub struct DeviceCompletion {
    sink: Arc<CompletionSink>,
}

impl DeviceCompletion {
    /// Wrap a sink; the sink returns false when the receiver is gone
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(DeviceEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn focus_done(&self, outcome: Result<FocusOutcome, DeviceFailure>) {
        self.post(DeviceEvent::Focus(outcome));
    }

    pub fn metering_done(&self, outcome: Result<(), DeviceFailure>) {
        self.post(DeviceEvent::Metering(outcome));
    }

    pub fn frame_done(&self, frame_index: u32, outcome: Result<CaptureResult, DeviceFailure>) {
        self.post(DeviceEvent::Frame {
            frame_index,
            outcome,
        });
    }

    fn post(&self, event: DeviceEvent) {
        if !(self.sink)(event) {
            debug!("Device completion arrived after shot ended, discarded");
        }
    }
}

impl std::fmt::Debug for DeviceCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCompletion").finish_non_exhaustive()
    }
}

/// Capability-queried camera device
///
/// All request methods must return without blocking; results are reported
/// through the supplied [`DeviceCompletion`], possibly from another thread
/// and possibly out of order for pipelined requests.
pub trait CaptureDevice: Send + Sync {
    // ===== Capability query =====

    /// Capability snapshot of the open session
    ///
    /// Pure. Returns `BackendError::DeviceNotOpen` when no session is open.
    fn capabilities(&self) -> BackendResult<CaptureCapabilities>;

    /// Whether a device session is open
    fn is_open(&self) -> bool;

    // ===== Focus and metering =====

    /// Start an autofocus scan
    fn focus(&self, completion: DeviceCompletion);

    /// Start precapture (AE) metering for a flash capture
    fn meter(&self, flash: FlashMode, completion: DeviceCompletion);

    // ===== Capture =====

    /// Issue a single capture request and wait for it before the next one
    fn capture_frame(&self, spec: &FrameSpec, output: OutputFormat, completion: DeviceCompletion);

    /// Queue a request into the hardware burst pipeline
    ///
    /// Only called when the capability snapshot reports `hardware_burst`.
    fn queue_burst_frame(
        &self,
        spec: &FrameSpec,
        output: OutputFormat,
        completion: DeviceCompletion,
    );

    /// Best-effort cancellation of requests already handed to the device
    fn cancel_in_flight(&self);
}
