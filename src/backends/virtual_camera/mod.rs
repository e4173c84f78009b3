// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera device
//!
//! An in-process [`CaptureDevice`] that produces synthetic frames. Every
//! request is logged and per-frame behaviour can be scripted, which makes it
//! the device behind the CLI as well as the integration tests.
//!
//! # Request flow
//!
//! ```text
//! capture_frame(spec)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ FrameBehavior    │  ← Complete / Delay / Hold / Fail / FailOnce
//! └──────────────────┘
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ Synthetic output │  ← JPEG via `image`, RAW as 10-bit samples
//! └──────────────────┘
//!        │
//!        ▼
//!   DeviceCompletion (posted from a worker thread)
//! ```

mod synthetic;

pub use synthetic::{synthetic_jpeg, synthetic_raw};

use crate::backends::camera::types::*;
use crate::backends::camera::{CaptureDevice, DeviceCompletion};
use chrono::Local;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Scripted outcome of a capture request
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBehavior {
    /// Complete immediately
    Complete,
    /// Complete after a delay
    Delay(Duration),
    /// Keep the request pending until [`VirtualCamera::release_frame`]
    Hold,
    /// Fail every attempt
    Fail(DeviceFailure),
    /// Fail the first attempt, complete later ones
    FailOnce(DeviceFailure),
}

/// Scripted outcome of an autofocus scan
#[derive(Debug, Clone, PartialEq)]
pub enum FocusBehavior {
    Focus,
    NotFocused,
    /// Never report back
    Silent,
    /// Stay silent for the first scan only
    SilentOnce,
    /// Lock focus after a delay
    Delay(Duration),
    Fail(DeviceFailure),
}

/// Scripted outcome of precapture metering
#[derive(Debug, Clone, PartialEq)]
pub enum MeteringBehavior {
    Converge,
    Silent,
    SilentOnce,
    Fail(DeviceFailure),
}

/// A request as seen by the device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Focus,
    Meter(FlashMode),
    Capture(FrameSpec),
    QueueBurst(FrameSpec),
    CancelInFlight,
}

impl DeviceCall {
    fn frame_spec(&self) -> Option<&FrameSpec> {
        match self {
            DeviceCall::Capture(spec) | DeviceCall::QueueBurst(spec) => Some(spec),
            _ => None,
        }
    }
}

struct HeldRequest {
    spec: FrameSpec,
    output: OutputFormat,
    completion: DeviceCompletion,
}

struct Script {
    default_frame: FrameBehavior,
    frames: HashMap<u32, FrameBehavior>,
    failed_once: HashSet<u32>,
    focus: FocusBehavior,
    focus_scans: u32,
    metering: MeteringBehavior,
    metering_runs: u32,
}

struct Inner {
    capabilities: CaptureCapabilities,
    frame_size: Resolution,
    open: AtomicBool,
    script: Mutex<Script>,
    calls: Mutex<Vec<DeviceCall>>,
    held: Mutex<BTreeMap<u32, HeldRequest>>,
    capture_count: watch::Sender<usize>,
}

/// Scriptable in-process camera device
#[derive(Clone)]
pub struct VirtualCamera {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Default capability snapshot for a virtual device on `api`
pub fn default_capabilities(api: CameraApi) -> CaptureCapabilities {
    let resolutions = vec![
        Resolution::new(4032, 3024),
        Resolution::new(3264, 2448),
        Resolution::new(1920, 1080),
    ];
    let flash_modes = vec![FlashMode::Off, FlashMode::Auto, FlashMode::On, FlashMode::Torch];
    match api {
        CameraApi::Legacy => CaptureCapabilities {
            camera_id: "virtual-0".to_string(),
            api,
            resolutions,
            flash_modes,
            max_burst_count: 10,
            max_raw_images: 0,
            supports_raw: false,
            hardware_burst: false,
            burst_pipeline_depth: 1,
            native_exposure_bracketing: false,
            native_focus_bracketing: false,
            manual_focus: false,
            min_focus_distance: 0.0,
            exposure_compensation_range: (-2.0, 2.0),
        },
        CameraApi::RequestBased => CaptureCapabilities {
            camera_id: "virtual-0".to_string(),
            api,
            resolutions,
            flash_modes,
            max_burst_count: 30,
            max_raw_images: 10,
            supports_raw: true,
            hardware_burst: true,
            burst_pipeline_depth: 3,
            native_exposure_bracketing: true,
            native_focus_bracketing: false,
            manual_focus: true,
            min_focus_distance: 10.0,
            exposure_compensation_range: (-3.0, 3.0),
        },
    }
}

impl VirtualCamera {
    /// Create an open virtual device with the default capabilities of `api`
    pub fn new(api: CameraApi) -> Self {
        Self::with_capabilities(default_capabilities(api))
    }

    /// Create an open virtual device reporting `capabilities`
    pub fn with_capabilities(capabilities: CaptureCapabilities) -> Self {
        info!(camera = %capabilities.camera_id, api = %capabilities.api, "Virtual camera opened");
        let (capture_count, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                capabilities,
                frame_size: Resolution::new(64, 48),
                open: AtomicBool::new(true),
                script: Mutex::new(Script {
                    default_frame: FrameBehavior::Complete,
                    frames: HashMap::new(),
                    failed_once: HashSet::new(),
                    focus: FocusBehavior::Focus,
                    focus_scans: 0,
                    metering: MeteringBehavior::Converge,
                    metering_runs: 0,
                }),
                calls: Mutex::new(Vec::new()),
                held: Mutex::new(BTreeMap::new()),
                capture_count,
            }),
        }
    }

    // ===== Scripting =====

    /// Behaviour for frames without a per-index script
    pub fn set_default_behavior(&self, behavior: FrameBehavior) {
        lock(&self.inner.script).default_frame = behavior;
    }

    pub fn set_frame_behavior(&self, frame_index: u32, behavior: FrameBehavior) {
        lock(&self.inner.script).frames.insert(frame_index, behavior);
    }

    pub fn set_focus_behavior(&self, behavior: FocusBehavior) {
        lock(&self.inner.script).focus = behavior;
    }

    pub fn set_metering_behavior(&self, behavior: MeteringBehavior) {
        lock(&self.inner.script).metering = behavior;
    }

    /// Close the device session; pending and future requests fail with `Closed`
    pub fn close(&self) {
        info!("Virtual camera closed");
        self.inner.open.store(false, Ordering::SeqCst);
        let held = std::mem::take(&mut *lock(&self.inner.held));
        for (index, request) in held {
            request
                .completion
                .frame_done(index, Err(DeviceFailure::Closed));
        }
    }

    // ===== Inspection =====

    /// Every request received so far, in order
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.inner.calls).clone()
    }

    /// Frame specs of all capture requests (single and burst), in order
    pub fn capture_requests(&self) -> Vec<FrameSpec> {
        lock(&self.inner.calls)
            .iter()
            .filter_map(|c| c.frame_spec().cloned())
            .collect()
    }

    /// Indices of requests currently held
    pub fn held_frames(&self) -> Vec<u32> {
        lock(&self.inner.held).keys().copied().collect()
    }

    /// Wait until at least `count` capture requests have been received
    pub async fn wait_for_captures(&self, count: usize) {
        let mut rx = self.inner.capture_count.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// Complete a held request successfully
    pub fn release_frame(&self, frame_index: u32) -> bool {
        let Some(request) = lock(&self.inner.held).remove(&frame_index) else {
            return false;
        };
        debug!(frame = frame_index, "Releasing held frame");
        self.emit_outputs(&request.spec, request.output, &request.completion);
        true
    }

    /// Fail a held request
    pub fn fail_frame(&self, frame_index: u32, failure: DeviceFailure) -> bool {
        let Some(request) = lock(&self.inner.held).remove(&frame_index) else {
            return false;
        };
        request.completion.frame_done(frame_index, Err(failure));
        true
    }

    // ===== Internals =====

    fn record(&self, call: DeviceCall) {
        let is_capture = call.frame_spec().is_some();
        lock(&self.inner.calls).push(call);
        if is_capture {
            self.inner.capture_count.send_modify(|n| *n += 1);
        }
    }

    fn is_open_internal(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, frame_index: u32) -> FrameBehavior {
        let mut script = lock(&self.inner.script);
        let behavior = script
            .frames
            .get(&frame_index)
            .cloned()
            .unwrap_or_else(|| script.default_frame.clone());
        match behavior {
            FrameBehavior::FailOnce(failure) => {
                if script.failed_once.insert(frame_index) {
                    FrameBehavior::Fail(failure)
                } else {
                    FrameBehavior::Complete
                }
            }
            other => other,
        }
    }

    fn emit_outputs(&self, spec: &FrameSpec, output: OutputFormat, completion: &DeviceCompletion) {
        let ev = spec.exposure.compensation().unwrap_or(0.0);
        let timestamp = Local::now();
        if output.includes_raw() {
            completion.frame_done(
                spec.frame_index,
                Ok(CaptureResult {
                    frame_index: spec.frame_index,
                    payload: FramePayload::Raw(synthetic_raw(self.inner.frame_size, ev)),
                    capture_timestamp: timestamp,
                }),
            );
        }
        if output.includes_jpeg() {
            let outcome = synthetic_jpeg(self.inner.frame_size, spec.frame_index, ev)
                .map(|bytes| CaptureResult {
                    frame_index: spec.frame_index,
                    payload: FramePayload::Jpeg(bytes),
                    capture_timestamp: timestamp,
                })
                .map_err(|e| DeviceFailure::Hard(e.to_string()));
            completion.frame_done(spec.frame_index, outcome);
        }
    }

    fn handle_request(&self, spec: &FrameSpec, output: OutputFormat, completion: DeviceCompletion) {
        if !self.is_open_internal() {
            completion.frame_done(spec.frame_index, Err(DeviceFailure::Closed));
            return;
        }

        match self.behavior_for(spec.frame_index) {
            FrameBehavior::Complete => self.emit_outputs(spec, output, &completion),
            FrameBehavior::Delay(delay) => {
                let camera = self.clone();
                let spec = spec.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    if camera.is_open_internal() {
                        camera.emit_outputs(&spec, output, &completion);
                    } else {
                        completion.frame_done(spec.frame_index, Err(DeviceFailure::Closed));
                    }
                });
            }
            FrameBehavior::Hold => {
                lock(&self.inner.held).insert(
                    spec.frame_index,
                    HeldRequest {
                        spec: spec.clone(),
                        output,
                        completion,
                    },
                );
            }
            FrameBehavior::Fail(failure) | FrameBehavior::FailOnce(failure) => {
                debug!(frame = spec.frame_index, %failure, "Scripted frame failure");
                completion.frame_done(spec.frame_index, Err(failure));
            }
        }
    }
}

impl CaptureDevice for VirtualCamera {
    fn capabilities(&self) -> BackendResult<CaptureCapabilities> {
        if self.is_open_internal() {
            Ok(self.inner.capabilities.clone())
        } else {
            Err(BackendError::DeviceNotOpen)
        }
    }

    fn is_open(&self) -> bool {
        self.is_open_internal()
    }

    fn focus(&self, completion: DeviceCompletion) {
        self.record(DeviceCall::Focus);
        if !self.is_open_internal() {
            completion.focus_done(Err(DeviceFailure::Closed));
            return;
        }
        let behavior = {
            let mut script = lock(&self.inner.script);
            script.focus_scans += 1;
            match &script.focus {
                FocusBehavior::SilentOnce if script.focus_scans > 1 => FocusBehavior::Focus,
                other => other.clone(),
            }
        };
        match behavior {
            FocusBehavior::Focus => completion.focus_done(Ok(FocusOutcome::Focused)),
            FocusBehavior::NotFocused => completion.focus_done(Ok(FocusOutcome::NotFocused)),
            FocusBehavior::Silent | FocusBehavior::SilentOnce => {
                debug!("Autofocus scan left unanswered");
            }
            FocusBehavior::Delay(delay) => {
                let camera = self.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    if camera.is_open_internal() {
                        completion.focus_done(Ok(FocusOutcome::Focused));
                    } else {
                        completion.focus_done(Err(DeviceFailure::Closed));
                    }
                });
            }
            FocusBehavior::Fail(failure) => completion.focus_done(Err(failure)),
        }
    }

    fn meter(&self, flash: FlashMode, completion: DeviceCompletion) {
        self.record(DeviceCall::Meter(flash));
        if !self.is_open_internal() {
            completion.metering_done(Err(DeviceFailure::Closed));
            return;
        }
        let behavior = {
            let mut script = lock(&self.inner.script);
            script.metering_runs += 1;
            match &script.metering {
                MeteringBehavior::SilentOnce if script.metering_runs > 1 => {
                    MeteringBehavior::Converge
                }
                other => other.clone(),
            }
        };
        match behavior {
            MeteringBehavior::Converge => completion.metering_done(Ok(())),
            MeteringBehavior::Silent | MeteringBehavior::SilentOnce => {
                debug!("Precapture metering left unanswered");
            }
            MeteringBehavior::Fail(failure) => completion.metering_done(Err(failure)),
        }
    }

    fn capture_frame(&self, spec: &FrameSpec, output: OutputFormat, completion: DeviceCompletion) {
        self.record(DeviceCall::Capture(spec.clone()));
        self.handle_request(spec, output, completion);
    }

    fn queue_burst_frame(
        &self,
        spec: &FrameSpec,
        output: OutputFormat,
        completion: DeviceCompletion,
    ) {
        if !self.inner.capabilities.hardware_burst {
            warn!(
                frame = spec.frame_index,
                "Burst request on a device without hardware burst"
            );
        }
        self.record(DeviceCall::QueueBurst(spec.clone()));
        self.handle_request(spec, output, completion);
    }

    fn cancel_in_flight(&self) {
        self.record(DeviceCall::CancelInFlight);
        let dropped = std::mem::take(&mut *lock(&self.inner.held));
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropped held requests on cancel");
        }
    }
}

impl std::fmt::Debug for VirtualCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCamera")
            .field("camera", &self.inner.capabilities.camera_id)
            .field("api", &self.inner.capabilities.api)
            .field("open", &self.is_open_internal())
            .finish()
    }
}
