// SPDX-License-Identifier: MPL-2.0

//! Shot planning and orchestration pipelines
//!
//! Planning is synchronous and side-effect free; orchestration runs in a
//! background task per shot so the caller (and the preview) never blocks.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Shot request │ ──▶ │  Photo pipeline   │ ──▶ │  ShotPlan    │
//! │ mode+settings│     │  - mode rules     │     │  FrameSpecs  │
//! │              │     │  - bracketing     │     │  strategy    │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │  ShotPlan    │ ──▶ │  Shot pipeline    │ ──▶ │ Save pipeline│
//! │              │     │  - session actor  │     │              │
//! │              │     │  - gate           │     │              │
//! │              │     │  - dispatcher     │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`photo`]: Photo modes, settings, plan builder and capture strategies
//! - [`shot`]: Orchestrator, backpressure gate and result dispatcher

pub mod photo;
pub mod shot;
