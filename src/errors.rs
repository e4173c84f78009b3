// SPDX-License-Identifier: GPL-3.0-only

//! Error types for shot planning and capture orchestration

use std::fmt;

use crate::backends::camera::types::BackendError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Shot could not be planned
    Plan(PlanError),
    /// Capture failed while the shot was running
    Capture(CaptureError),
    /// Device layer errors
    Backend(BackendError),
    /// Shot request rejected before any device interaction
    Request(RequestError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
}

/// Errors raised synchronously by the shot plan builder
///
/// These are never retried; the caller sees them before the device is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// The device cannot satisfy the mode/output combination
    Unsupported(String),
    /// The mode is incompatible with video recording or RAW-only output
    ConflictingMode(String),
    /// Settings are out of range in a way that cannot be clamped
    InvalidSettings(String),
}

/// Errors raised while a shot is being captured
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Autofocus did not report back in time (after the bounded retry)
    FocusTimeout,
    /// Precapture metering did not converge in time (after the bounded retry)
    MeteringTimeout,
    /// The device failed to deliver a frame
    DeviceFrameError { frame_index: u32, message: String },
    /// The device was closed underneath the shot
    DeviceClosed,
    /// The save queue stayed full longer than the allowed pause
    QueueTimeout,
}

/// Reasons a shot request is rejected before a session is created
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Plan building failed
    Plan(PlanError),
    /// Another shot is already active on this device session
    Busy,
    /// No device is open
    DeviceNotOpen,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Plan(e) => write!(f, "Plan error: {}", e),
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Backend(e) => write!(f, "Backend error: {}", e),
            AppError::Request(e) => write!(f, "Request error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            PlanError::ConflictingMode(msg) => write!(f, "Conflicting mode: {}", msg),
            PlanError::InvalidSettings(msg) => write!(f, "Invalid settings: {}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::FocusTimeout => write!(f, "Autofocus timed out"),
            CaptureError::MeteringTimeout => write!(f, "Precapture metering timed out"),
            CaptureError::DeviceFrameError {
                frame_index,
                message,
            } => write!(f, "Frame {} failed: {}", frame_index, message),
            CaptureError::DeviceClosed => write!(f, "Camera device closed"),
            CaptureError::QueueTimeout => write!(f, "Save queue did not drain in time"),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Plan(e) => write!(f, "{}", e),
            RequestError::Busy => write!(f, "A shot is already in progress"),
            RequestError::DeviceNotOpen => write!(f, "Camera device is not open"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for PlanError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for RequestError {}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        AppError::Plan(err)
    }
}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        AppError::Request(err)
    }
}

impl From<PlanError> for RequestError {
    fn from(err: PlanError) -> Self {
        RequestError::Plan(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
