// SPDX-License-Identifier: GPL-3.0-only

//! Capture session actor
//!
//! One task per shot. Device completions, cancel and stop requests all
//! arrive through a single inbox, so every state transition runs serially
//! on the session task and the session state is never touched from a
//! device callback.
//!
//! ```text
//! Idle ─► Focusing ─► Metering ─► CapturingFrame(i) ─► AwaitingNextFrame ─┐
//!            │            │              ▲                   │            │
//!            │            │              └──── Paused ◄──────┘            │
//!            ▼            ▼                                               ▼
//!          Failed      Failed                        Completed | Aborted | Failed
//! ```
//!
//! A frame that fails with lost focus sends the session back to `Focusing`
//! and is reissued once the lens reports back.

use super::dispatcher::ResultDispatcher;
use super::gate::BackpressureGate;
use super::{OrchestratorConfig, ShotOutcome, ShotState, ShotUpdate};
use crate::backends::camera::types::{CaptureResult, DeviceFailure, FocusOutcome};
use crate::backends::camera::{CaptureDevice, DeviceCompletion, DeviceEvent};
use crate::errors::CaptureError;
use crate::pipelines::photo::{CaptureStrategy, ShotPlan};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Retries allowed per frame for recoverable failures
const MAX_FRAME_RETRIES: u32 = 1;

/// Attempts for autofocus and metering (first try plus one retry)
const PHASE_ATTEMPTS: u32 = 2;

/// Request id shared by every frame capture; frames carry their own index
const FRAME_REQUEST: u64 = 0;

/// Input to the session inbox
#[derive(Debug)]
pub(crate) enum ShotInput {
    /// Device completion, tagged with the request that produced it
    Device { request: u64, event: DeviceEvent },
    Cancel,
    Stop,
}

/// Frames held back until a mid-shot refocus reports in
struct Refocus {
    request: u64,
    deadline: Instant,
    frames: Vec<u32>,
}

fn reports_closed(event: &DeviceEvent) -> bool {
    matches!(
        event,
        DeviceEvent::Focus(Err(DeviceFailure::Closed))
            | DeviceEvent::Metering(Err(DeviceFailure::Closed))
            | DeviceEvent::Frame {
                outcome: Err(DeviceFailure::Closed),
                ..
            }
    )
}

/// Why the capture sequence ended early
enum Interrupt {
    Cancel,
    Fail(CaptureError),
}

type Step<T = ()> = Result<T, Interrupt>;

pub(crate) struct ShotSession {
    id: Uuid,
    plan: ShotPlan,
    run_focus: bool,
    device: Arc<dyn CaptureDevice>,
    strategy: Box<dyn CaptureStrategy>,
    gate: BackpressureGate,
    dispatcher: ResultDispatcher,
    config: OrchestratorConfig,

    inbox: mpsc::UnboundedReceiver<ShotInput>,
    inbox_tx: mpsc::UnboundedSender<ShotInput>,
    updates: mpsc::UnboundedSender<ShotUpdate>,
    state_tx: watch::Sender<ShotState>,

    state: ShotState,
    /// Next frame index to issue
    next_index: u32,
    in_flight: BTreeSet<u32>,
    pending_retries: HashMap<u32, u32>,
    stop_requested: bool,
    last_issue: Option<Instant>,
    /// Last focus/metering request id handed to the device
    last_request: u64,
    refocus: Option<Refocus>,
}

pub(crate) struct SessionParts {
    pub id: Uuid,
    pub plan: ShotPlan,
    pub run_focus: bool,
    pub device: Arc<dyn CaptureDevice>,
    pub strategy: Box<dyn CaptureStrategy>,
    pub gate: BackpressureGate,
    pub dispatcher: ResultDispatcher,
    pub config: OrchestratorConfig,
    pub inbox: mpsc::UnboundedReceiver<ShotInput>,
    pub inbox_tx: mpsc::UnboundedSender<ShotInput>,
    pub updates: mpsc::UnboundedSender<ShotUpdate>,
    pub state_tx: watch::Sender<ShotState>,
}

impl ShotSession {
    pub(crate) fn new(parts: SessionParts) -> Self {
        Self {
            id: parts.id,
            plan: parts.plan,
            run_focus: parts.run_focus,
            device: parts.device,
            strategy: parts.strategy,
            gate: parts.gate,
            dispatcher: parts.dispatcher,
            config: parts.config,
            inbox: parts.inbox,
            inbox_tx: parts.inbox_tx,
            updates: parts.updates,
            state_tx: parts.state_tx,
            state: ShotState::Idle,
            next_index: 0,
            in_flight: BTreeSet::new(),
            pending_retries: HashMap::new(),
            stop_requested: false,
            last_issue: None,
            last_request: FRAME_REQUEST,
            refocus: None,
        }
    }

    /// Drive the shot to a terminal state
    pub(crate) async fn run(mut self) -> ShotOutcome {
        info!(
            shot = %self.id,
            mode = %self.plan.mode(),
            total_frames = ?self.plan.total_frames(),
            strategy = ?self.strategy.kind(),
            "Shot started"
        );

        if !self.plan.corrections().is_empty() {
            self.emit(ShotUpdate::SettingsCorrected(self.plan.corrections().to_vec()));
        }

        let result = self.drive().await;
        let frames_completed = self.dispatcher.delivered();

        match result {
            Ok(()) => {
                self.transition(ShotState::Completed);
                info!(shot = %self.id, frames_completed, "Shot completed");
                self.emit(ShotUpdate::Completed { frames_completed });
                ShotOutcome::Completed { frames_completed }
            }
            Err(Interrupt::Cancel) => {
                self.release_device();
                self.transition(ShotState::Aborted);
                info!(shot = %self.id, frames_completed, "Shot aborted");
                self.emit(ShotUpdate::Aborted { frames_completed });
                ShotOutcome::Aborted { frames_completed }
            }
            Err(Interrupt::Fail(error)) => {
                self.release_device();
                self.transition(ShotState::Failed);
                warn!(shot = %self.id, %error, frames_completed, "Shot failed");
                self.emit(ShotUpdate::Failed {
                    reason: error.clone(),
                    frames_completed,
                });
                ShotOutcome::Failed {
                    error,
                    frames_completed,
                }
            }
        }
    }

    async fn drive(&mut self) -> Step {
        if self.run_focus {
            self.focus_phase().await?;
        }
        if self.plan.meta().requires_precapture_metering {
            self.metering_phase().await?;
        }
        self.capture_phase().await
    }

    // ===== Plumbing =====

    fn completion(&self, request: u64) -> DeviceCompletion {
        let tx = self.inbox_tx.clone();
        DeviceCompletion::new(move |event| tx.send(ShotInput::Device { request, event }).is_ok())
    }

    fn next_request(&mut self) -> u64 {
        self.last_request += 1;
        self.last_request
    }

    fn ensure_open(&self) -> Step {
        if self.device.is_open() {
            Ok(())
        } else {
            Err(Interrupt::Fail(CaptureError::DeviceClosed))
        }
    }

    fn emit(&self, update: ShotUpdate) {
        // The handle may already be gone; updates are best effort
        let _ = self.updates.send(update);
    }

    fn transition(&mut self, next: ShotState) {
        if self.state != next {
            debug!(shot = %self.id, from = ?self.state, to = ?next, "Shot state");
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    /// Next inbox message, or `None` once `deadline` passes
    ///
    /// Wakes at least once per poll interval so a device that closes
    /// without reporting back still ends the shot.
    async fn next_input(&mut self, deadline: Option<Instant>) -> Step<Option<ShotInput>> {
        loop {
            self.ensure_open()?;
            let poll = Instant::now() + self.config.pause_poll_interval();
            let wake = deadline.map_or(poll, |deadline| deadline.min(poll));
            if let Ok(received) = tokio::time::timeout_at(wake, self.inbox.recv()).await {
                // The session holds a sender, so the inbox cannot close under it
                return Ok(Some(received.unwrap_or(ShotInput::Cancel)));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }
        }
    }

    /// Cancel outstanding device work and drop undelivered results
    fn release_device(&mut self) {
        if !self.in_flight.is_empty()
            || self.refocus.is_some()
            || matches!(self.state, ShotState::Focusing | ShotState::Metering)
        {
            debug!(shot = %self.id, in_flight = self.in_flight.len(), "Cancelling in-flight requests");
            self.device.cancel_in_flight();
        }
        self.in_flight.clear();
        self.refocus = None;
        self.dispatcher.discard_pending();
    }

    // ===== Focus and metering =====

    async fn focus_phase(&mut self) -> Step {
        self.transition(ShotState::Focusing);
        for attempt in 1..=PHASE_ATTEMPTS {
            let request = self.next_request();
            self.device.focus(self.completion(request));
            let deadline = Instant::now() + self.config.focus_timeout();
            loop {
                let Some(input) = self.next_input(Some(deadline)).await? else {
                    warn!(shot = %self.id, attempt, "Autofocus timed out");
                    break;
                };
                match input {
                    ShotInput::Cancel => return Err(Interrupt::Cancel),
                    ShotInput::Stop => self.stop_requested = true,
                    ShotInput::Device { event, .. } if reports_closed(&event) => {
                        return Err(Interrupt::Fail(CaptureError::DeviceClosed));
                    }
                    ShotInput::Device {
                        request: answered,
                        event: DeviceEvent::Focus(outcome),
                    } if answered == request => {
                        match outcome {
                            Ok(FocusOutcome::Focused) => {}
                            Ok(FocusOutcome::NotFocused) => {
                                warn!(shot = %self.id, "Autofocus did not lock, continuing");
                            }
                            Err(failure) => {
                                warn!(shot = %self.id, %failure, "Autofocus failed, continuing");
                            }
                        }
                        return Ok(());
                    }
                    ShotInput::Device { request, event } => {
                        debug!(shot = %self.id, request, ?event, "Ignoring stale event while focusing");
                    }
                }
            }
        }
        Err(Interrupt::Fail(CaptureError::FocusTimeout))
    }

    async fn metering_phase(&mut self) -> Step {
        self.transition(ShotState::Metering);
        let flash = self.plan.meta().flash;
        for attempt in 1..=PHASE_ATTEMPTS {
            let request = self.next_request();
            self.device.meter(flash, self.completion(request));
            let deadline = Instant::now() + self.config.metering_timeout();
            loop {
                let Some(input) = self.next_input(Some(deadline)).await? else {
                    warn!(shot = %self.id, attempt, "Precapture metering timed out");
                    break;
                };
                match input {
                    ShotInput::Cancel => return Err(Interrupt::Cancel),
                    ShotInput::Stop => self.stop_requested = true,
                    ShotInput::Device { event, .. } if reports_closed(&event) => {
                        return Err(Interrupt::Fail(CaptureError::DeviceClosed));
                    }
                    ShotInput::Device {
                        request: answered,
                        event: DeviceEvent::Metering(outcome),
                    } if answered == request => match outcome {
                        Ok(()) => return Ok(()),
                        Err(failure) => {
                            warn!(shot = %self.id, attempt, %failure, "Precapture metering failed");
                            break;
                        }
                    },
                    ShotInput::Device { request, event } => {
                        debug!(shot = %self.id, request, ?event, "Ignoring stale event while metering");
                    }
                }
            }
        }
        Err(Interrupt::Fail(CaptureError::MeteringTimeout))
    }

    // ===== Capture =====

    /// Whether another new frame may be issued right now
    fn can_issue(&self) -> bool {
        self.refocus.is_none()
            && self.has_more_frames()
            && self.in_flight.len() < self.strategy.window()
    }

    fn has_more_frames(&self) -> bool {
        if self.stop_requested {
            return false;
        }
        match self.plan.total_frames() {
            Some(total) => self.next_index < total,
            None => true,
        }
    }

    /// Payload counts not yet in the save queue, including one more frame
    fn prospective_counts(&self) -> (usize, usize) {
        let output = self.plan.meta().output;
        let frames = self.in_flight.len() + self.dispatcher.buffered() + 1;
        let raw = if output.includes_raw() { frames } else { 0 };
        let jpeg = if output.includes_jpeg() { frames } else { 0 };
        (raw, jpeg)
    }

    async fn capture_phase(&mut self) -> Step {
        loop {
            while self.can_issue() {
                self.wait_frame_interval().await?;
                if !self.can_issue() || !self.admit_next().await? || !self.can_issue() {
                    break;
                }
                self.ensure_open()?;
                self.issue_next();
            }

            if self.in_flight.is_empty() && !self.has_more_frames() {
                return Ok(());
            }

            if let Some(input) = self.next_capture_input(None).await? {
                self.handle_capture_input(input)?;
            }
        }
    }

    fn handle_capture_input(&mut self, input: ShotInput) -> Step {
        match input {
            ShotInput::Cancel => Err(Interrupt::Cancel),
            ShotInput::Stop => {
                if !self.stop_requested {
                    info!(shot = %self.id, in_flight = self.in_flight.len(), "Stop requested, draining");
                }
                self.stop_requested = true;
                Ok(())
            }
            ShotInput::Device { event, .. } if reports_closed(&event) => {
                Err(Interrupt::Fail(CaptureError::DeviceClosed))
            }
            ShotInput::Device {
                event: DeviceEvent::Frame {
                    frame_index,
                    outcome,
                },
                ..
            } => self.on_frame(frame_index, outcome),
            ShotInput::Device {
                request,
                event: DeviceEvent::Focus(outcome),
            } if self.refocus.as_ref().is_some_and(|refocus| refocus.request == request) => {
                self.finish_refocus(outcome)
            }
            ShotInput::Device { request, event } => {
                debug!(shot = %self.id, request, ?event, "Ignoring stale focus/metering event");
                Ok(())
            }
        }
    }

    /// Like `next_input`, but a pending refocus bounds the wait
    async fn next_capture_input(&mut self, deadline: Option<Instant>) -> Step<Option<ShotInput>> {
        let refocus_deadline = self.refocus.as_ref().map(|refocus| refocus.deadline);
        let wait_until = match (deadline, refocus_deadline) {
            (Some(deadline), Some(refocus)) => Some(deadline.min(refocus)),
            (deadline, refocus) => deadline.or(refocus),
        };
        let input = self.next_input(wait_until).await?;
        if input.is_none() && refocus_deadline.is_some_and(|refocus| Instant::now() >= refocus) {
            warn!(shot = %self.id, "Refocus timed out");
            return Err(Interrupt::Fail(CaptureError::FocusTimeout));
        }
        Ok(input)
    }

    /// Keep handling inbox messages until `deadline`
    async fn process_until(&mut self, deadline: Instant) -> Step {
        while let Some(input) = self.next_capture_input(Some(deadline)).await? {
            self.handle_capture_input(input)?;
        }
        Ok(())
    }

    async fn wait_frame_interval(&mut self) -> Step {
        let (Some(interval), Some(last)) = (self.plan.meta().frame_interval, self.last_issue) else {
            return Ok(());
        };
        let deadline = last + interval;
        if deadline > Instant::now() {
            self.process_until(deadline).await?;
        }
        Ok(())
    }

    /// Consult the gate, pausing until admitted
    ///
    /// Returns false when a stop arrived while paused.
    async fn admit_next(&mut self) -> Step<bool> {
        let (raw, jpeg) = self.prospective_counts();
        let decision = self.gate.admit(raw, jpeg);
        if decision.allow {
            return Ok(true);
        }

        let resume_state = self.state;
        warn!(
            shot = %self.id,
            frame = self.next_index,
            reason = ?decision.reason,
            "Save queue backpressure, pausing"
        );
        self.transition(ShotState::Paused);
        self.emit(ShotUpdate::QueuePaused);
        let paused_at = Instant::now();

        loop {
            self.process_until(Instant::now() + self.config.pause_poll_interval())
                .await?;
            self.ensure_open()?;

            if self.stop_requested {
                self.emit(ShotUpdate::QueueResumed);
                return Ok(false);
            }

            let (raw, jpeg) = self.prospective_counts();
            if self.gate.admit(raw, jpeg).allow {
                info!(shot = %self.id, paused_for = ?paused_at.elapsed(), "Save queue drained, resuming");
                self.transition(resume_state);
                self.emit(ShotUpdate::QueueResumed);
                return Ok(true);
            }

            if paused_at.elapsed() >= self.config.max_pause() {
                return Err(Interrupt::Fail(CaptureError::QueueTimeout));
            }
        }
    }

    fn issue_next(&mut self) {
        let index = self.next_index;
        let Some(spec) = self.plan.frame(index) else {
            // Bounded plans never run past their length
            self.next_index = u32::MAX;
            return;
        };
        self.transition(ShotState::CapturingFrame(index));
        self.in_flight.insert(index);
        self.next_index += 1;
        self.last_issue = Some(Instant::now());
        let completion = self.completion(FRAME_REQUEST);
        let output = self.plan.meta().output;
        self.strategy
            .issue(self.device.as_ref(), &spec, output, completion);
    }

    fn on_frame(
        &mut self,
        frame_index: u32,
        outcome: Result<CaptureResult, DeviceFailure>,
    ) -> Step {
        if !self.in_flight.contains(&frame_index) {
            debug!(shot = %self.id, frame = frame_index, "Dropping completion for frame not in flight");
            return Ok(());
        }

        let result = match outcome {
            Ok(result) => result,
            Err(DeviceFailure::Closed) => {
                return Err(Interrupt::Fail(CaptureError::DeviceClosed));
            }
            Err(failure) => return self.retry_or_fail(frame_index, failure),
        };

        let total = self.plan.total_frames();
        let dispatched = self.dispatcher.dispatch(result, self.plan.meta());
        if let Some(done) = dispatched.frame_complete {
            self.in_flight.remove(&done);
            self.pending_retries.remove(&done);
            self.transition(ShotState::AwaitingNextFrame);
        }
        for frame_index in dispatched.released {
            debug!(shot = %self.id, frame = frame_index, "Frame delivered");
            self.emit(ShotUpdate::FrameCaptured { frame_index, total });
        }
        Ok(())
    }

    fn retry_or_fail(&mut self, frame_index: u32, failure: DeviceFailure) -> Step {
        let retryable = matches!(failure, DeviceFailure::FocusLost | DeviceFailure::Transient(_));
        let retries = self.pending_retries.entry(frame_index).or_insert(0);
        if !retryable || *retries >= MAX_FRAME_RETRIES {
            return Err(Interrupt::Fail(CaptureError::DeviceFrameError {
                frame_index,
                message: failure.to_string(),
            }));
        }
        *retries += 1;
        warn!(shot = %self.id, frame = frame_index, %failure, "Retrying frame");

        self.dispatcher.discard_frame(frame_index);
        if failure == DeviceFailure::FocusLost {
            self.start_refocus(frame_index);
            Ok(())
        } else {
            self.reissue(frame_index)
        }
    }

    /// Hold `frame_index` back until the lens has refocused
    fn start_refocus(&mut self, frame_index: u32) {
        if let Some(refocus) = &mut self.refocus {
            refocus.frames.push(frame_index);
            return;
        }
        let request = self.next_request();
        info!(shot = %self.id, frame = frame_index, "Focus lost, refocusing before retry");
        self.transition(ShotState::Focusing);
        self.device.focus(self.completion(request));
        self.refocus = Some(Refocus {
            request,
            deadline: Instant::now() + self.config.focus_timeout(),
            frames: vec![frame_index],
        });
    }

    fn finish_refocus(&mut self, outcome: Result<FocusOutcome, DeviceFailure>) -> Step {
        let Some(refocus) = self.refocus.take() else {
            return Ok(());
        };
        match outcome {
            Ok(FocusOutcome::Focused) => debug!(shot = %self.id, "Refocused"),
            Ok(FocusOutcome::NotFocused) => {
                warn!(shot = %self.id, "Refocus did not lock, retrying anyway");
            }
            Err(failure) => warn!(shot = %self.id, %failure, "Refocus failed, retrying anyway"),
        }
        for frame_index in refocus.frames {
            self.reissue(frame_index)?;
        }
        Ok(())
    }

    fn reissue(&mut self, frame_index: u32) -> Step {
        self.ensure_open()?;
        let Some(spec) = self.plan.frame(frame_index) else {
            return Err(Interrupt::Fail(CaptureError::DeviceFrameError {
                frame_index,
                message: "frame is outside the plan".into(),
            }));
        };
        self.transition(ShotState::CapturingFrame(frame_index));
        let completion = self.completion(FRAME_REQUEST);
        let output = self.plan.meta().output;
        self.strategy
            .issue(self.device.as_ref(), &spec, output, completion);
        Ok(())
    }
}
