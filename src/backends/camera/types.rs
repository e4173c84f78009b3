// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera device abstraction

//! Shared types for camera backends

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Underlying device capture API
///
/// The two APIs expose different capability sets; the orchestrator never
/// branches on this value, it only reads the capability snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CameraApi {
    /// Older one-shot API: no RAW, no hardware burst, no manual focus
    Legacy,
    /// Request-queue API with per-frame controls
    #[default]
    RequestBased,
}

impl std::fmt::Display for CameraApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraApi::Legacy => write!(f, "legacy"),
            CameraApi::RequestBased => write!(f, "request-based"),
        }
    }
}

/// Flash operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlashMode {
    /// Flash LED is off
    #[default]
    Off,
    /// Device decides whether to fire based on metering
    Auto,
    /// Flash fires during capture
    On,
    /// Torch / flashlight mode (LED stays on continuously)
    Torch,
}

impl FlashMode {
    /// Whether a capture with this mode needs precapture (AE) metering first
    pub fn needs_precapture(&self) -> bool {
        matches!(self, FlashMode::Auto | FlashMode::On)
    }
}

/// Output resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable capability snapshot of an open device session
///
/// Queried once when the session opens and again after any camera or API
/// switch. Never mutated in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureCapabilities {
    pub camera_id: String,
    pub api: CameraApi,
    /// Supported still resolutions, largest first
    pub resolutions: Vec<Resolution>,
    pub flash_modes: Vec<FlashMode>,
    /// Upper bound on frames in a single burst/bracket
    pub max_burst_count: u32,
    /// Upper bound on RAW images outstanding at once (0 when RAW unsupported)
    pub max_raw_images: u32,
    pub supports_raw: bool,
    /// Device can pipeline several capture requests at once
    pub hardware_burst: bool,
    /// Number of requests the burst pipeline accepts in flight
    pub burst_pipeline_depth: u32,
    pub native_exposure_bracketing: bool,
    pub native_focus_bracketing: bool,
    /// Manual focus distance control is available
    pub manual_focus: bool,
    /// Minimum focus distance in diopters (0 = infinity only)
    pub min_focus_distance: f32,
    /// Supported exposure compensation range in EV
    pub exposure_compensation_range: (f32, f32),
}

impl CaptureCapabilities {
    pub fn supports_flash(&self, mode: FlashMode) -> bool {
        mode == FlashMode::Off || self.flash_modes.contains(&mode)
    }

    pub fn clamp_exposure_compensation(&self, ev: f32) -> f32 {
        let (min, max) = self.exposure_compensation_range;
        ev.clamp(min, max)
    }

    pub fn largest_resolution(&self) -> Option<Resolution> {
        self.resolutions.iter().copied().max_by_key(|r| r.pixels())
    }
}

/// Exposure parameter for a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExposureSetting {
    /// Compensation relative to auto exposure, in EV
    Compensation(f32),
    /// Manual exposure time
    Time(Duration),
}

impl ExposureSetting {
    /// EV value when the setting is expressed as compensation
    pub fn compensation(&self) -> Option<f32> {
        match self {
            ExposureSetting::Compensation(ev) => Some(*ev),
            ExposureSetting::Time(_) => None,
        }
    }
}

/// Parameters for one hardware capture within a shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub frame_index: u32,
    pub exposure: ExposureSetting,
    /// Focus distance in diopters; `None` keeps the current focus
    pub focus_distance: Option<f32>,
    pub flash_override: Option<FlashMode>,
    pub is_target_infinity_focus: bool,
}

/// What payloads each frame produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    JpegAndRaw,
    RawOnly,
}

impl OutputFormat {
    pub fn includes_raw(&self) -> bool {
        matches!(self, OutputFormat::JpegAndRaw | OutputFormat::RawOnly)
    }

    pub fn includes_jpeg(&self) -> bool {
        matches!(self, OutputFormat::Jpeg | OutputFormat::JpegAndRaw)
    }

    pub fn is_dual(&self) -> bool {
        *self == OutputFormat::JpegAndRaw
    }
}

/// Bayer RAW sensor buffer
#[derive(Debug, Clone)]
pub struct RawBuffer {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u8,
    pub data: Arc<[u16]>,
}

/// Decoded RGBA bitmap
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<[u8]>,
}

/// Encoded or raw image data for one frame
#[derive(Debug, Clone)]
pub enum FramePayload {
    Jpeg(Arc<[u8]>),
    Raw(RawBuffer),
    Bitmap(Bitmap),
}

/// Payload discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Jpeg,
    Raw,
    Bitmap,
}

impl FramePayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            FramePayload::Jpeg(_) => PayloadKind::Jpeg,
            FramePayload::Raw(_) => PayloadKind::Raw,
            FramePayload::Bitmap(_) => PayloadKind::Bitmap,
        }
    }

    /// Approximate memory held by this payload
    pub fn size_bytes(&self) -> usize {
        match self {
            FramePayload::Jpeg(bytes) => bytes.len(),
            FramePayload::Raw(raw) => raw.data.len() * 2,
            FramePayload::Bitmap(bitmap) => bitmap.rgba.len(),
        }
    }
}

/// One completed frame output
///
/// Ownership moves from the orchestrator to the dispatcher and then to the
/// save pipeline.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub frame_index: u32,
    pub payload: FramePayload,
    pub capture_timestamp: DateTime<Local>,
}

/// Autofocus outcome reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    Focused,
    /// Scan finished without a lock; capture proceeds anyway
    NotFocused,
}

/// Per-request device failure
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceFailure {
    /// Focus was lost during the frame; worth one re-acquire and retry
    FocusLost,
    /// Transient frame error; worth one retry
    Transient(String),
    /// Hard device error; no retry
    Hard(String),
    /// Device closed; aborts the whole shot
    Closed,
}

impl std::fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFailure::FocusLost => write!(f, "focus lost"),
            DeviceFailure::Transient(msg) => write!(f, "transient error: {}", msg),
            DeviceFailure::Hard(msg) => write!(f, "device error: {}", msg),
            DeviceFailure::Closed => write!(f, "device closed"),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No device session is open
    DeviceNotOpen,
    /// Camera device not found
    DeviceNotFound(String),
    /// Backend is not available on this system
    NotAvailable(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceNotOpen => write!(f, "Device not open"),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}
