// SPDX-License-Identifier: GPL-3.0-only

//! Camera device lifecycle manager
//!
//! The manager provides:
//! - Ownership of the active device
//! - The capability snapshot for the open session, re-queried on switch
//! - Thread-safe access from the UI and the orchestrator

use super::CaptureDevice;
use super::types::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Internal manager state
struct ManagerState {
    /// The active device
    device: Arc<dyn CaptureDevice>,
    /// Snapshot queried when the device was opened or switched
    capabilities: Option<CaptureCapabilities>,
}

/// Camera device manager
///
/// Thread-safe and can be shared across threads.
#[derive(Clone)]
pub struct DeviceManager {
    state: Arc<Mutex<ManagerState>>,
}

impl DeviceManager {
    /// Create a manager for `device` and take its capability snapshot
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        let capabilities = Self::query(device.as_ref());
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                device,
                capabilities,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query(device: &dyn CaptureDevice) -> Option<CaptureCapabilities> {
        match device.capabilities() {
            Ok(caps) => {
                info!(
                    camera = %caps.camera_id,
                    api = %caps.api,
                    max_burst = caps.max_burst_count,
                    max_raw = caps.max_raw_images,
                    hardware_burst = caps.hardware_burst,
                    "Capability snapshot taken"
                );
                Some(caps)
            }
            Err(e) => {
                warn!(error = %e, "Device capabilities unavailable");
                None
            }
        }
    }

    /// The active device
    pub fn device(&self) -> Arc<dyn CaptureDevice> {
        Arc::clone(&self.lock().device)
    }

    /// Capability snapshot of the open session
    pub fn capabilities(&self) -> BackendResult<CaptureCapabilities> {
        self.lock()
            .capabilities
            .clone()
            .ok_or(BackendError::DeviceNotOpen)
    }

    /// Re-query the snapshot from the active device
    ///
    /// Needed after the device reopens its session.
    pub fn refresh(&self) -> BackendResult<CaptureCapabilities> {
        let mut state = self.lock();
        let caps = state.device.capabilities()?;
        state.capabilities = Some(caps.clone());
        Ok(caps)
    }

    /// Switch to a different camera or device API
    ///
    /// The previous device's in-flight requests are cancelled and the
    /// capability snapshot is replaced by the new device's.
    pub fn switch_device(&self, device: Arc<dyn CaptureDevice>) -> BackendResult<()> {
        let mut state = self.lock();
        state.device.cancel_in_flight();
        let caps = device.capabilities()?;
        info!(camera = %caps.camera_id, api = %caps.api, "Switched camera device");
        state.device = device;
        state.capabilities = Some(caps);
        Ok(())
    }

    /// Whether the active device has an open session
    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.capabilities.is_some() && state.device.is_open()
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DeviceManager")
            .field(
                "camera",
                &state.capabilities.as_ref().map(|c| c.camera_id.as_str()),
            )
            .field("open", &state.device.is_open())
            .finish()
    }
}
