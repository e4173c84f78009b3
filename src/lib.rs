// SPDX-License-Identifier: MPL-2.0

//! Camera Shot - multi-frame shot orchestration for camera devices
//!
//! This library decides when and how many frames to request from a camera
//! for one user-triggered shot, in what order, and how the results flow to
//! storage.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera device trait, capability snapshot, virtual camera
//! - [`pipelines`]: Shot planning and the capture orchestrator
//! - [`storage`]: Save queue counters and the save pipeline boundary
//! - [`config`]: User configuration handling
//! - [`errors`]: Error types
//!
//! # Example
//!
//! ```ignore
//! let camera = Arc::new(VirtualCamera::new(CameraApi::RequestBased));
//! let queue = SaveQueue::new();
//! let saver = Arc::new(DirectorySaver::new(dir, queue.clone(), 8)?);
//! let orchestrator = ShotOrchestrator::new(
//!     DeviceManager::new(camera),
//!     queue,
//!     saver,
//!     OrchestratorConfig::default(),
//!     GateConfig::default(),
//! );
//! let handle = orchestrator.request_shot(PhotoMode::Hdr, CaptureSettings::default())?;
//! let outcome = handle.wait().await;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{CameraApi, CaptureCapabilities, CaptureDevice, DeviceManager};
pub use backends::virtual_camera::VirtualCamera;
pub use config::Config;
pub use errors::{AppError, AppResult, CaptureError, PlanError, RequestError};
pub use pipelines::photo::{CaptureSettings, PhotoMode, ShotPlan, build_plan};
pub use pipelines::shot::{ShotHandle, ShotOrchestrator, ShotOutcome, ShotState, ShotUpdate};
pub use storage::{DirectorySaver, SavePipeline, SaveQueue};
