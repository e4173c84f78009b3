// SPDX-License-Identifier: GPL-3.0-only

//! Shot orchestration
//!
//! [`ShotOrchestrator::request_shot`] builds the plan synchronously, then
//! spawns one session task that owns all shot state until it reaches a
//! terminal state:
//!
//! ```text
//! request_shot(mode, settings)
//!        │
//!        ▼
//! build_plan ──► PlanError (no device interaction)
//!        │
//!        ▼
//! ┌──────────────────┐   DeviceCompletion   ┌────────────────┐
//! │   ShotSession    │ ◄─────────────────── │ CaptureDevice  │
//! │ (one inbox task) │ ───────────────────► │                │
//! └──────────────────┘   CaptureStrategy    └────────────────┘
//!        │       ▲
//!        │       └── BackpressureGate (before every frame)
//!        ▼
//! ResultDispatcher ──► SavePipeline
//!        │
//!        ▼
//! ShotUpdate events ──► ShotHandle
//! ```

pub mod dispatcher;
pub mod gate;
pub mod reorder;
mod session;

pub use dispatcher::{DispatchOutcome, ResultDispatcher};
pub use gate::{AdmissionDecision, BackpressureGate, DenyReason, GateConfig};
pub use reorder::ReorderBuffer;

use crate::backends::camera::{CaptureDevice, DeviceManager};
use crate::constants;
use crate::errors::{CaptureError, RequestError};
use crate::pipelines::photo::{CaptureSettings, PhotoMode, PlanCorrection, ShotPlan, build_plan, select_strategy};
use crate::storage::{SavePipeline, SaveQueue};
use serde::{Deserialize, Serialize};
use session::{SessionParts, ShotInput, ShotSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShotState {
    Idle,
    Focusing,
    Metering,
    CapturingFrame(u32),
    AwaitingNextFrame,
    /// Waiting for the save queue to drain
    Paused,
    Completed,
    Aborted,
    Failed,
}

impl ShotState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShotState::Completed | ShotState::Aborted | ShotState::Failed
        )
    }
}

/// Event reported to the application while a shot runs
#[derive(Debug, Clone, PartialEq)]
pub enum ShotUpdate {
    SettingsCorrected(Vec<PlanCorrection>),
    /// A frame was handed to the save pipeline
    FrameCaptured {
        frame_index: u32,
        total: Option<u32>,
    },
    QueuePaused,
    QueueResumed,
    Completed {
        frames_completed: u32,
    },
    Failed {
        reason: CaptureError,
        frames_completed: u32,
    },
    Aborted {
        frames_completed: u32,
    },
}

/// Terminal result of a shot
#[derive(Debug, Clone, PartialEq)]
pub enum ShotOutcome {
    Completed { frames_completed: u32 },
    Aborted { frames_completed: u32 },
    Failed {
        error: CaptureError,
        frames_completed: u32,
    },
}

impl ShotOutcome {
    pub fn frames_completed(&self) -> u32 {
        match self {
            ShotOutcome::Completed { frames_completed }
            | ShotOutcome::Aborted { frames_completed }
            | ShotOutcome::Failed {
                frames_completed, ..
            } => *frames_completed,
        }
    }
}

/// Orchestrator timing, persisted in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub focus_timeout_ms: u64,
    pub metering_timeout_ms: u64,
    pub pause_poll_interval_ms: u64,
    pub max_pause_ms: u64,
    /// Run autofocus before the first frame
    pub startup_focus: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            focus_timeout_ms: constants::timing::FOCUS_TIMEOUT.as_millis() as u64,
            metering_timeout_ms: constants::timing::METERING_TIMEOUT.as_millis() as u64,
            pause_poll_interval_ms: constants::timing::PAUSE_POLL_INTERVAL.as_millis() as u64,
            max_pause_ms: constants::timing::MAX_PAUSE.as_millis() as u64,
            startup_focus: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn focus_timeout(&self) -> Duration {
        Duration::from_millis(self.focus_timeout_ms)
    }

    pub fn metering_timeout(&self) -> Duration {
        Duration::from_millis(self.metering_timeout_ms)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms.max(1))
    }

    pub fn max_pause(&self) -> Duration {
        Duration::from_millis(self.max_pause_ms)
    }
}

/// Application-side handle of a running shot
pub struct ShotHandle {
    id: Uuid,
    mode: PhotoMode,
    commands: mpsc::UnboundedSender<ShotInput>,
    updates: mpsc::UnboundedReceiver<ShotUpdate>,
    state: watch::Receiver<ShotState>,
    task: JoinHandle<ShotOutcome>,
}

impl ShotHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> PhotoMode {
        self.mode
    }

    /// Abort the shot at the next transition boundary
    pub fn cancel(&self) {
        let _ = self.commands.send(ShotInput::Cancel);
    }

    /// Stop issuing frames; frames in flight are still delivered
    pub fn stop(&self) {
        let _ = self.commands.send(ShotInput::Stop);
    }

    pub fn state(&self) -> ShotState {
        *self.state.borrow()
    }

    /// Wait until the session reaches a state matching `predicate`
    ///
    /// Returns the matching state, or `None` if the session ended first.
    pub async fn wait_for_state<F>(&mut self, mut predicate: F) -> Option<ShotState>
    where
        F: FnMut(&ShotState) -> bool,
    {
        self.state
            .wait_for(|s| predicate(s))
            .await
            .ok()
            .map(|s| *s)
    }

    /// Next event, or `None` once the session has ended and all events were read
    pub async fn next_update(&mut self) -> Option<ShotUpdate> {
        self.updates.recv().await
    }

    /// Events already received, without waiting
    pub fn drain_updates(&mut self) -> Vec<ShotUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> ShotOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(shot = %self.id, error = %e, "Shot task ended abnormally");
                ShotOutcome::Aborted {
                    frames_completed: 0,
                }
            }
        }
    }
}

impl std::fmt::Debug for ShotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShotHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

/// Clears the active flag when the session task ends, however it ends
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Entry point for the application: one active shot per device session
pub struct ShotOrchestrator {
    devices: DeviceManager,
    queue: SaveQueue,
    pipeline: Arc<dyn SavePipeline>,
    config: OrchestratorConfig,
    gate_config: GateConfig,
    active: Arc<AtomicBool>,
    current: Mutex<Option<mpsc::UnboundedSender<ShotInput>>>,
}

impl ShotOrchestrator {
    pub fn new(
        devices: DeviceManager,
        queue: SaveQueue,
        pipeline: Arc<dyn SavePipeline>,
        config: OrchestratorConfig,
        gate_config: GateConfig,
    ) -> Self {
        Self {
            devices,
            queue,
            pipeline,
            config,
            gate_config,
            active: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn queue(&self) -> &SaveQueue {
        &self.queue
    }

    /// Whether a shot is running
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Build the plan a request would run, without starting it
    pub fn plan_shot(
        &self,
        mode: PhotoMode,
        settings: &CaptureSettings,
    ) -> Result<ShotPlan, RequestError> {
        if !self.devices.is_open() {
            return Err(RequestError::DeviceNotOpen);
        }
        let capabilities = self
            .devices
            .capabilities()
            .map_err(|_| RequestError::DeviceNotOpen)?;
        Ok(build_plan(mode, settings, &capabilities)?)
    }

    /// Start a shot
    ///
    /// Plan errors are returned before the device is touched. Must be called
    /// from within a tokio runtime.
    pub fn request_shot(
        &self,
        mode: PhotoMode,
        settings: CaptureSettings,
    ) -> Result<ShotHandle, RequestError> {
        let plan = self.plan_shot(mode, &settings)?;
        let capabilities = self
            .devices
            .capabilities()
            .map_err(|_| RequestError::DeviceNotOpen)?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RequestError::Busy);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let id = Uuid::new_v4();
        let device: Arc<dyn CaptureDevice> = self.devices.device();
        let strategy = select_strategy(plan.meta(), &capabilities);
        let gate = BackpressureGate::new(
            self.queue.clone(),
            Arc::clone(&self.pipeline),
            capabilities.max_raw_images,
            self.gate_config.clone(),
        );
        let dispatcher = ResultDispatcher::new(id, self.queue.clone(), Arc::clone(&self.pipeline));

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ShotState::Idle);

        let session = ShotSession::new(SessionParts {
            id,
            run_focus: settings.startup_focus && self.config.startup_focus && !settings.focus_locked,
            plan,
            device,
            strategy,
            gate,
            dispatcher,
            config: self.config.clone(),
            inbox,
            inbox_tx: inbox_tx.clone(),
            updates: updates_tx,
            state_tx,
        });

        info!(shot = %id, mode = %mode, "Shot requested");
        let task = tokio::spawn(async move {
            let _guard = guard;
            session.run().await
        });

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbox_tx.clone());

        Ok(ShotHandle {
            id,
            mode,
            commands: inbox_tx,
            updates,
            state,
            task,
        })
    }

    pub fn cancel_shot(&self, handle: &ShotHandle) {
        info!(shot = %handle.id(), "Cancelling shot");
        handle.cancel();
    }

    /// Cancel whatever shot is running, if any
    pub fn cancel_active(&self) {
        if let Some(commands) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = commands.send(ShotInput::Cancel);
        }
    }

    /// Switch device or API; a running shot is aborted first
    pub fn switch_device(
        &self,
        device: Arc<dyn CaptureDevice>,
    ) -> crate::backends::camera::BackendResult<()> {
        self.cancel_active();
        self.devices.switch_device(device)
    }
}
