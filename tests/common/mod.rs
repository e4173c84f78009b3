// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for integration tests

#![allow(dead_code)]

use camera_shot::backends::camera::types::CameraApi;
use camera_shot::pipelines::shot::{GateConfig, OrchestratorConfig, ShotHandle, ShotUpdate};
use camera_shot::storage::SaveRequest;
use camera_shot::{DeviceManager, SavePipeline, SaveQueue, ShotOrchestrator, VirtualCamera};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Save pipeline that records every unit and completes it immediately
pub struct RecordingSavePipeline {
    queue: SaveQueue,
    accept: AtomicBool,
    saved: Mutex<Vec<SaveRequest>>,
}

impl RecordingSavePipeline {
    pub fn new(queue: SaveQueue) -> Self {
        Self {
            queue,
            accept: AtomicBool::new(true),
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn set_accepting(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<SaveRequest> {
        self.saved.lock().unwrap().clone()
    }

    pub fn saved_indices(&self) -> Vec<u32> {
        self.saved().iter().map(|r| r.frame_index).collect()
    }
}

impl SavePipeline for RecordingSavePipeline {
    fn can_accept_more(&self, _raw_count: usize, _jpeg_count: usize) -> bool {
        self.accept.load(Ordering::SeqCst)
    }

    fn enqueue(&self, request: SaveRequest) {
        self.queue.completed(&request);
        self.saved.lock().unwrap().push(request);
    }

    fn pending_count(&self) -> usize {
        self.queue.pending_units()
    }
}

pub struct Fixture {
    pub camera: VirtualCamera,
    pub queue: SaveQueue,
    pub pipeline: Arc<RecordingSavePipeline>,
    pub orchestrator: ShotOrchestrator,
}

/// Short timings so timeout paths run quickly
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        focus_timeout_ms: 50,
        metering_timeout_ms: 50,
        pause_poll_interval_ms: 5,
        max_pause_ms: 2_000,
        startup_focus: true,
    }
}

pub fn fixture(api: CameraApi) -> Fixture {
    fixture_with(VirtualCamera::new(api), fast_config())
}

pub fn fixture_with(camera: VirtualCamera, config: OrchestratorConfig) -> Fixture {
    let queue = SaveQueue::new();
    let pipeline = Arc::new(RecordingSavePipeline::new(queue.clone()));
    let orchestrator = ShotOrchestrator::new(
        DeviceManager::new(Arc::new(camera.clone())),
        queue.clone(),
        pipeline.clone(),
        config,
        GateConfig::default(),
    );
    Fixture {
        camera,
        queue,
        pipeline,
        orchestrator,
    }
}

/// Read updates until the terminal one, failing the test after a while
pub async fn collect_updates(handle: &mut ShotHandle) -> Vec<ShotUpdate> {
    let mut updates = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), handle.next_update())
            .await
            .expect("shot did not finish in time");
        match next {
            Some(update) => updates.push(update),
            None => return updates,
        }
    }
}
