// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera devices
//!
//! The backend layer abstracts hardware access, providing a consistent API
//! regardless of which capture API the device speaks:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Shot Orchestration              │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌──────────────────┐  ┌────────────────┐   │
//! │  │  CaptureDevice   │  │ Virtual Camera │   │
//! │  │  + DeviceManager │  │  (in-process)  │   │
//! │  └──────────────────┘  └────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Device trait, capability snapshot, lifecycle manager
//! - [`virtual_camera`]: Scriptable synthetic device

pub mod camera;
pub mod virtual_camera;
