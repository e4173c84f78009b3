// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the shot orchestrator against the virtual camera

mod common;

use camera_shot::backends::camera::types::{CameraApi, DeviceFailure, FlashMode, OutputFormat};
use camera_shot::backends::virtual_camera::{
    DeviceCall, FocusBehavior, FrameBehavior, MeteringBehavior,
};
use camera_shot::pipelines::photo::{CaptureSettings, PhotoMode, PlanCorrection};
use camera_shot::pipelines::shot::{ShotOutcome, ShotState, ShotUpdate};
use camera_shot::{CaptureError, PlanError, RequestError};
use common::{collect_updates, fixture};
use std::time::Duration;

fn burst(images: u32) -> CaptureSettings {
    CaptureSettings {
        burst_images: images,
        ..Default::default()
    }
}

fn capture_indices(fx: &common::Fixture) -> Vec<u32> {
    fx.camera
        .capture_requests()
        .iter()
        .map(|s| s.frame_index)
        .collect()
}

fn focus_calls(fx: &common::Fixture) -> usize {
    fx.camera
        .calls()
        .iter()
        .filter(|c| matches!(c, DeviceCall::Focus))
        .count()
}

#[tokio::test]
async fn test_single_shot_completes() {
    let fx = fixture(CameraApi::RequestBased);
    let mut handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();

    let updates = collect_updates(&mut handle).await;
    assert_eq!(
        updates,
        vec![
            ShotUpdate::FrameCaptured {
                frame_index: 0,
                total: Some(1)
            },
            ShotUpdate::Completed {
                frames_completed: 1
            },
        ]
    );
    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 1 });
    assert_eq!(fx.camera.calls()[0], DeviceCall::Focus);
    assert_eq!(fx.pipeline.saved_indices(), vec![0]);
    assert!(!fx.orchestrator.is_busy());
}

#[tokio::test]
async fn test_out_of_order_burst_saved_in_order() {
    let fx = fixture(CameraApi::RequestBased);
    fx.camera.set_frame_behavior(0, FrameBehavior::Hold);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Hdr, CaptureSettings::default())
        .unwrap();

    // Frames 1 and 2 complete while frame 0 is still held
    fx.camera.wait_for_captures(3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(fx.pipeline.saved().is_empty());

    assert!(fx.camera.release_frame(0));
    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 3 });
    assert_eq!(fx.pipeline.saved_indices(), vec![0, 1, 2]);
    assert!(
        fx.camera
            .calls()
            .iter()
            .any(|c| matches!(c, DeviceCall::QueueBurst(_)))
    );
}

#[tokio::test]
async fn test_hardware_burst_keeps_pipeline_depth_in_flight() {
    let fx = fixture(CameraApi::RequestBased);
    fx.camera.set_default_behavior(FrameBehavior::Hold);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(5))
        .unwrap();

    fx.camera.wait_for_captures(3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.camera.capture_requests().len(), 3);

    for i in 0..5u32 {
        fx.camera.wait_for_captures((i as usize + 3).min(5)).await;
        assert!(fx.camera.release_frame(i));
    }

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 5 });
    assert_eq!(fx.pipeline.saved_indices(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_backpressure_pauses_until_pipeline_accepts() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(1, FrameBehavior::Hold);

    let mut handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(5))
        .unwrap();

    fx.camera.wait_for_captures(2).await;
    fx.pipeline.set_accepting(false);
    // The frame already capturing is allowed to finish
    assert!(fx.camera.release_frame(1));

    let paused = tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for_state(|s| *s == ShotState::Paused),
    )
    .await
    .unwrap();
    assert_eq!(paused, Some(ShotState::Paused));
    assert_eq!(fx.pipeline.saved_indices(), vec![0, 1]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(capture_indices(&fx), vec![0, 1]);

    fx.pipeline.set_accepting(true);
    let updates = collect_updates(&mut handle).await;
    let paused_at = updates.iter().position(|u| *u == ShotUpdate::QueuePaused);
    let resumed_at = updates.iter().position(|u| *u == ShotUpdate::QueueResumed);
    assert!(paused_at.unwrap() < resumed_at.unwrap());

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 5 });
    assert_eq!(capture_indices(&fx), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_pause_escalates_to_queue_timeout() {
    let mut config = common::fast_config();
    config.max_pause_ms = 40;
    let fx = common::fixture_with(
        camera_shot::VirtualCamera::new(CameraApi::Legacy),
        config,
    );
    fx.pipeline.set_accepting(false);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(3))
        .unwrap();

    assert_eq!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::QueueTimeout,
            frames_completed: 0
        }
    );
    assert!(fx.camera.capture_requests().is_empty());
}

#[tokio::test]
async fn test_cancel_during_third_frame() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(2, FrameBehavior::Hold);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(5))
        .unwrap();

    fx.camera.wait_for_captures(3).await;
    fx.orchestrator.cancel_shot(&handle);

    assert_eq!(handle.wait().await, ShotOutcome::Aborted { frames_completed: 2 });
    assert_eq!(capture_indices(&fx), vec![0, 1, 2]);
    assert!(fx.camera.calls().contains(&DeviceCall::CancelInFlight));
    assert_eq!(fx.pipeline.saved_indices(), vec![0, 1]);
}

#[tokio::test]
async fn test_late_completion_after_cancel_is_discarded() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera
        .set_frame_behavior(0, FrameBehavior::Delay(Duration::from_millis(60)));

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(3))
        .unwrap();
    fx.camera.wait_for_captures(1).await;
    handle.cancel();

    assert_eq!(handle.wait().await, ShotOutcome::Aborted { frames_completed: 0 });
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(fx.pipeline.saved().is_empty());
    assert_eq!(fx.queue.pending_units(), 0);
}

#[tokio::test]
async fn test_device_closed_fails_without_retry() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(1, FrameBehavior::Hold);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(5))
        .unwrap();

    fx.camera.wait_for_captures(2).await;
    fx.camera.close();

    assert_eq!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::DeviceClosed,
            frames_completed: 1
        }
    );
    assert_eq!(capture_indices(&fx), vec![0, 1]);
}

#[tokio::test]
async fn test_device_closed_while_focusing() {
    let mut config = common::fast_config();
    config.focus_timeout_ms = 5_000;
    let fx = common::fixture_with(
        camera_shot::VirtualCamera::new(CameraApi::RequestBased),
        config,
    );
    fx.camera.set_focus_behavior(FocusBehavior::Silent);

    let mut handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();
    handle
        .wait_for_state(|s| *s == ShotState::Focusing)
        .await
        .unwrap();
    fx.camera.close();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ShotOutcome::Failed {
            error: CaptureError::DeviceClosed,
            frames_completed: 0
        }
    );
    assert_eq!(focus_calls(&fx), 1);
    assert!(fx.camera.capture_requests().is_empty());
}

#[tokio::test]
async fn test_device_closed_while_metering() {
    let mut config = common::fast_config();
    config.metering_timeout_ms = 5_000;
    let fx = common::fixture_with(
        camera_shot::VirtualCamera::new(CameraApi::RequestBased),
        config,
    );
    fx.camera.set_metering_behavior(MeteringBehavior::Silent);
    let settings = CaptureSettings {
        flash: FlashMode::On,
        ..Default::default()
    };

    let mut handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, settings)
        .unwrap();
    handle
        .wait_for_state(|s| *s == ShotState::Metering)
        .await
        .unwrap();
    fx.camera.close();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ShotOutcome::Failed {
            error: CaptureError::DeviceClosed,
            frames_completed: 0
        }
    );
    let meter_calls = fx
        .camera
        .calls()
        .iter()
        .filter(|c| matches!(c, DeviceCall::Meter(_)))
        .count();
    assert_eq!(meter_calls, 1);
    assert!(fx.camera.capture_requests().is_empty());
}

#[tokio::test]
async fn test_device_closed_while_paused() {
    let fx = fixture(CameraApi::Legacy);
    fx.pipeline.set_accepting(false);

    let mut handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(3))
        .unwrap();
    handle
        .wait_for_state(|s| *s == ShotState::Paused)
        .await
        .unwrap();
    fx.camera.close();

    // Well inside the two second pause limit
    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ShotOutcome::Failed {
            error: CaptureError::DeviceClosed,
            frames_completed: 0
        }
    );
    assert!(fx.camera.capture_requests().is_empty());
}

#[tokio::test]
async fn test_transient_frame_error_retried_once() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(
        1,
        FrameBehavior::FailOnce(DeviceFailure::Transient("buffer underrun".into())),
    );

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(3))
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 3 });
    assert_eq!(capture_indices(&fx), vec![0, 1, 1, 2]);
    assert_eq!(fx.pipeline.saved_indices(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_repeated_transient_error_fails_with_count() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(
        2,
        FrameBehavior::Fail(DeviceFailure::Transient("sensor timeout".into())),
    );

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(5))
        .unwrap();

    match handle.wait().await {
        ShotOutcome::Failed {
            error: CaptureError::DeviceFrameError { frame_index, .. },
            frames_completed,
        } => {
            assert_eq!(frame_index, 2);
            assert_eq!(frames_completed, 2);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(capture_indices(&fx), vec![0, 1, 2, 2]);
}

#[tokio::test]
async fn test_hard_frame_error_not_retried() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera
        .set_frame_behavior(1, FrameBehavior::Fail(DeviceFailure::Hard("ISP fault".into())));

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(3))
        .unwrap();

    assert!(matches!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::DeviceFrameError { frame_index: 1, .. },
            frames_completed: 1
        }
    ));
    assert_eq!(capture_indices(&fx), vec![0, 1]);
}

#[tokio::test]
async fn test_focus_lost_refocuses_before_retry() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera
        .set_frame_behavior(0, FrameBehavior::FailOnce(DeviceFailure::FocusLost));

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 1 });
    let calls = fx.camera.calls();
    assert!(
        matches!(
            calls.as_slice(),
            [DeviceCall::Focus, DeviceCall::Capture(first), DeviceCall::Focus, DeviceCall::Capture(retry)]
                if first.frame_index == 0 && retry.frame_index == 0
        ),
        "unexpected call order: {:?}",
        calls
    );
}

#[tokio::test]
async fn test_focus_lost_retry_waits_for_refocus() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_focus_behavior(FocusBehavior::Silent);
    fx.camera
        .set_frame_behavior(0, FrameBehavior::FailOnce(DeviceFailure::FocusLost));
    let settings = CaptureSettings {
        focus_locked: true,
        ..Default::default()
    };

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, settings)
        .unwrap();

    assert_eq!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::FocusTimeout,
            frames_completed: 0
        }
    );
    // The retry is never issued while the refocus goes unanswered
    assert_eq!(capture_indices(&fx), vec![0]);
    let calls = fx.camera.calls();
    assert!(matches!(calls[0], DeviceCall::Capture(_)));
    assert_eq!(calls[1], DeviceCall::Focus);
    assert_eq!(focus_calls(&fx), 1);
}

#[tokio::test]
async fn test_late_focus_result_from_earlier_attempt_ignored() {
    let mut config = common::fast_config();
    config.focus_timeout_ms = 100;
    let fx = common::fixture_with(
        camera_shot::VirtualCamera::new(CameraApi::RequestBased),
        config,
    );
    // Each scan answers after its own attempt has already timed out
    fx.camera
        .set_focus_behavior(FocusBehavior::Delay(Duration::from_millis(160)));

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();

    assert_eq!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::FocusTimeout,
            frames_completed: 0
        }
    );
    assert_eq!(focus_calls(&fx), 2);
    assert!(fx.camera.capture_requests().is_empty());
}

#[tokio::test]
async fn test_focus_timeout_retried_once() {
    let fx = fixture(CameraApi::RequestBased);
    fx.camera.set_focus_behavior(FocusBehavior::SilentOnce);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 1 });
    assert_eq!(focus_calls(&fx), 2);
}

#[tokio::test]
async fn test_focus_timeout_fails_after_retry() {
    let fx = fixture(CameraApi::RequestBased);
    fx.camera.set_focus_behavior(FocusBehavior::Silent);

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::ExpoBracketing, CaptureSettings::default())
        .unwrap();

    assert_eq!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::FocusTimeout,
            frames_completed: 0
        }
    );
    assert_eq!(focus_calls(&fx), 2);
    assert!(fx.camera.capture_requests().is_empty());
}

#[tokio::test]
async fn test_focus_skipped_when_locked() {
    let fx = fixture(CameraApi::RequestBased);
    let settings = CaptureSettings {
        focus_locked: true,
        ..Default::default()
    };
    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, settings)
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 1 });
    assert_eq!(focus_calls(&fx), 0);
}

#[tokio::test]
async fn test_flash_runs_precapture_metering() {
    let fx = fixture(CameraApi::RequestBased);
    let settings = CaptureSettings {
        flash: FlashMode::On,
        ..Default::default()
    };
    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, settings)
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 1 });
    let calls = fx.camera.calls();
    assert_eq!(calls[0], DeviceCall::Focus);
    assert_eq!(calls[1], DeviceCall::Meter(FlashMode::On));
    assert!(matches!(calls[2], DeviceCall::Capture(_)));
}

#[tokio::test]
async fn test_metering_timeout_fails() {
    let fx = fixture(CameraApi::RequestBased);
    fx.camera.set_metering_behavior(MeteringBehavior::Silent);
    let settings = CaptureSettings {
        flash: FlashMode::Auto,
        ..Default::default()
    };
    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, settings)
        .unwrap();

    assert_eq!(
        handle.wait().await,
        ShotOutcome::Failed {
            error: CaptureError::MeteringTimeout,
            frames_completed: 0
        }
    );
}

#[tokio::test]
async fn test_dual_output_saved_as_one_unit() {
    let fx = fixture(CameraApi::RequestBased);
    let settings = CaptureSettings {
        output: OutputFormat::JpegAndRaw,
        ..Default::default()
    };
    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, settings)
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 1 });
    let saved = fx.pipeline.saved();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].jpeg.is_some());
    assert!(saved[0].raw.is_some());
}

#[tokio::test]
async fn test_unbounded_panorama_stops_after_draining() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera
        .set_default_behavior(FrameBehavior::Delay(Duration::from_millis(5)));

    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Panorama, CaptureSettings::default())
        .unwrap();

    fx.camera.wait_for_captures(3).await;
    handle.stop();

    let outcome = handle.wait().await;
    let requested = fx.camera.capture_requests().len() as u32;
    assert!(requested >= 3);
    assert_eq!(outcome, ShotOutcome::Completed { frames_completed: requested });
    assert_eq!(fx.pipeline.saved().len() as u32, requested);
    assert!(fx.pipeline.saved().iter().all(|r| r.total_frames.is_none()));
}

#[tokio::test]
async fn test_corrections_reported_before_frames() {
    let fx = fixture(CameraApi::Legacy);
    let mut handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, burst(50))
        .unwrap();

    let updates = collect_updates(&mut handle).await;
    assert_eq!(
        updates[0],
        ShotUpdate::SettingsCorrected(vec![PlanCorrection::FrameCountClamped {
            requested: 50,
            applied: 10
        }])
    );
    assert_eq!(
        updates.last(),
        Some(&ShotUpdate::Completed {
            frames_completed: 10
        })
    );
}

#[tokio::test]
async fn test_plan_error_returned_before_device_interaction() {
    let fx = fixture(CameraApi::RequestBased);
    let settings = CaptureSettings {
        output: OutputFormat::RawOnly,
        ..Default::default()
    };
    let result = fx.orchestrator.request_shot(PhotoMode::Hdr, settings);
    assert!(matches!(
        result,
        Err(RequestError::Plan(PlanError::ConflictingMode(_)))
    ));
    assert!(fx.camera.calls().is_empty());
    assert!(!fx.orchestrator.is_busy());
}

#[tokio::test]
async fn test_one_active_shot_at_a_time() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(0, FrameBehavior::Hold);

    let first = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();
    assert!(matches!(
        fx.orchestrator
            .request_shot(PhotoMode::Single, CaptureSettings::default()),
        Err(RequestError::Busy)
    ));

    first.cancel();
    first.wait().await;

    fx.camera.set_frame_behavior(0, FrameBehavior::Complete);
    let second = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();
    assert_eq!(second.wait().await, ShotOutcome::Completed { frames_completed: 1 });
}

#[tokio::test]
async fn test_closed_device_rejects_request() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.close();
    assert!(matches!(
        fx.orchestrator
            .request_shot(PhotoMode::Single, CaptureSettings::default()),
        Err(RequestError::DeviceNotOpen)
    ));
}

#[tokio::test]
async fn test_switch_device_aborts_running_shot() {
    let fx = fixture(CameraApi::Legacy);
    fx.camera.set_frame_behavior(0, FrameBehavior::Hold);
    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::Single, CaptureSettings::default())
        .unwrap();
    fx.camera.wait_for_captures(1).await;

    let replacement = std::sync::Arc::new(camera_shot::VirtualCamera::new(CameraApi::RequestBased));
    fx.orchestrator.switch_device(replacement).unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Aborted { frames_completed: 0 });
    assert_eq!(
        fx.orchestrator.devices().capabilities().unwrap().api,
        CameraApi::RequestBased
    );
}

#[tokio::test]
async fn test_burst_interval_spaces_frames() {
    let fx = fixture(CameraApi::Legacy);
    let settings = CaptureSettings {
        burst_images: 3,
        burst_interval: Some(Duration::from_millis(30)),
        ..Default::default()
    };
    let started = tokio::time::Instant::now();
    let handle = fx
        .orchestrator
        .request_shot(PhotoMode::FastBurst, settings)
        .unwrap();

    assert_eq!(handle.wait().await, ShotOutcome::Completed { frames_completed: 3 });
    assert!(started.elapsed() >= Duration::from_millis(60));
}
