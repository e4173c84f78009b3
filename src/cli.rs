// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for shot operations
//!
//! This module provides command-line functionality for:
//! - Showing the capability snapshot of a device API
//! - Running a shot against the virtual camera
//! - Printing the effective configuration

use camera_shot::backends::camera::types::{CameraApi, FlashMode, OutputFormat};
use camera_shot::pipelines::photo::{CaptureSettings, PhotoMode, RepeatMode};
use camera_shot::pipelines::shot::{ShotOrchestrator, ShotOutcome, ShotUpdate};
use camera_shot::{Config, DeviceManager, DirectorySaver, SaveQueue, VirtualCamera, build_plan};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Options of the `shoot` command
#[derive(Debug, Clone)]
pub struct ShootOptions {
    pub mode: PhotoMode,
    pub api: CameraApi,
    pub frames: Option<u32>,
    pub stops: Option<f32>,
    pub raw: bool,
    pub flash: Option<FlashMode>,
    pub output: Option<PathBuf>,
    pub duration: u64,
}

/// Print the capability snapshot of the virtual device for `api`
pub fn print_capabilities(api: CameraApi) -> Result<(), Box<dyn std::error::Error>> {
    use camera_shot::CaptureDevice;

    let camera = VirtualCamera::new(api);
    let caps = camera.capabilities()?;

    println!("Camera {} ({} API)", caps.camera_id, caps.api);
    println!();
    let resolutions: Vec<String> = caps
        .resolutions
        .iter()
        .map(|r| format!("{}x{}", r.width, r.height))
        .collect();
    println!("  Resolutions:        {}", resolutions.join(", "));
    println!("  Flash modes:        {:?}", caps.flash_modes);
    println!("  Max burst:          {}", caps.max_burst_count);
    println!(
        "  RAW:                {}",
        if caps.supports_raw {
            format!("yes (max {} images)", caps.max_raw_images)
        } else {
            "no".to_string()
        }
    );
    println!(
        "  Hardware burst:     {}",
        if caps.hardware_burst {
            format!("yes (depth {})", caps.burst_pipeline_depth)
        } else {
            "no".to_string()
        }
    );
    println!("  Native exposure bracketing: {}", caps.native_exposure_bracketing);
    println!("  Native focus bracketing:    {}", caps.native_focus_bracketing);
    println!("  Manual focus:       {}", caps.manual_focus);
    println!(
        "  Exposure range:     {:+.1} .. {:+.1} EV",
        caps.exposure_compensation_range.0, caps.exposure_compensation_range.1
    );
    println!();

    println!("Modes:");
    let settings = CaptureSettings::default();
    for mode in PhotoMode::ALL {
        match build_plan(mode, &settings, &caps) {
            Ok(plan) => println!(
                "  {:<20} {} frame(s), {:?}",
                mode.display_name(),
                plan.total_frames()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unbounded".to_string()),
                plan.meta().strategy
            ),
            Err(e) => println!("  {:<20} unavailable: {}", mode.display_name(), e),
        }
    }

    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    if let Some(path) = Config::default_path() {
        eprintln!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Apply command line overrides to the configured capture settings
fn apply_overrides(settings: &mut CaptureSettings, options: &ShootOptions) {
    if let Some(frames) = options.frames {
        match options.mode {
            PhotoMode::ExpoBracketing => settings.expo_bracketing_images = frames,
            PhotoMode::FocusBracketing => settings.focus_bracketing_images = frames,
            PhotoMode::FastBurst => settings.burst_images = frames,
            PhotoMode::NoiseReduction => settings.nr_images = frames,
            PhotoMode::Single | PhotoMode::Dro => settings.repeat = RepeatMode::Count(frames),
            PhotoMode::Hdr | PhotoMode::Panorama => {
                eprintln!("--frames has no effect in {} mode", options.mode);
            }
        }
    }
    if let Some(stops) = options.stops {
        settings.expo_bracketing_stops = stops;
        settings.hdr_stops = stops;
    }
    if options.raw {
        settings.output = OutputFormat::JpegAndRaw;
    }
    if let Some(flash) = options.flash {
        settings.flash = flash;
    }
    if options.mode == PhotoMode::FocusBracketing {
        // Sweep from the closest distance to infinity unless configured
        if settings.focus_source_distance == settings.focus_target_distance {
            settings.focus_source_distance = 10.0;
            settings.focus_target_distance = 0.0;
        }
    }
}

fn print_update(update: &ShotUpdate) {
    match update {
        ShotUpdate::SettingsCorrected(corrections) => {
            for correction in corrections {
                println!("  note: {}", correction);
            }
        }
        ShotUpdate::FrameCaptured { frame_index, total } => match total {
            Some(total) => println!("  frame {}/{}", frame_index + 1, total),
            None => println!("  frame {}", frame_index + 1),
        },
        ShotUpdate::QueuePaused => println!("  save queue full, paused"),
        ShotUpdate::QueueResumed => println!("  resumed"),
        ShotUpdate::Completed { .. } | ShotUpdate::Failed { .. } | ShotUpdate::Aborted { .. } => {}
    }
}

/// Run a shot against the virtual camera and save it
pub fn shoot(options: ShootOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let mut settings = config.capture.clone();
    apply_overrides(&mut settings, &options);
    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| config.photo_directory());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_shot(options, config, settings, output_dir))
}

enum Interrupt {
    Cancel,
    Stop,
}

async fn run_shot(
    options: ShootOptions,
    config: Config,
    settings: CaptureSettings,
    output_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let camera = Arc::new(VirtualCamera::new(options.api));
    let queue = SaveQueue::new();
    let saver = Arc::new(DirectorySaver::new(
        output_dir.clone(),
        queue.clone(),
        config.gate.safe_queue_depth,
    )?);
    let orchestrator = ShotOrchestrator::new(
        DeviceManager::new(camera),
        queue.clone(),
        saver.clone(),
        config.orchestrator.clone(),
        config.gate.clone(),
    );

    let plan = orchestrator.plan_shot(options.mode, &settings)?;
    println!(
        "{} shot: {} frame(s), {:?} strategy, saving to {}",
        options.mode,
        plan.total_frames()
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("unbounded ({}s)", options.duration)),
        plan.meta().strategy,
        output_dir.display()
    );

    let mut handle = orchestrator.request_shot(options.mode, settings)?;

    let (cancel_tx, mut cancel_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = cancel_tx.send(());
    })?;

    let stop_after = plan.is_unbounded().then(|| Duration::from_secs(options.duration));
    let stop_timer = tokio::time::sleep(stop_after.unwrap_or(Duration::MAX));
    tokio::pin!(stop_timer);
    let mut stopping = false;

    loop {
        let mut interrupt = None;
        tokio::select! {
            update = handle.next_update() => match update {
                Some(update) => print_update(&update),
                None => break,
            },
            Some(()) = cancel_rx.recv() => interrupt = Some(Interrupt::Cancel),
            _ = &mut stop_timer, if stop_after.is_some() && !stopping => {
                stopping = true;
                interrupt = Some(Interrupt::Stop);
            }
        }
        match interrupt {
            Some(Interrupt::Cancel) => {
                println!("Cancelling...");
                orchestrator.cancel_shot(&handle);
            }
            Some(Interrupt::Stop) => handle.stop(),
            None => {}
        }
    }

    let outcome = handle.wait().await;
    queue.wait_until_drained().await;
    let saved = saver.saved_files();

    match outcome {
        ShotOutcome::Completed { frames_completed } => {
            println!(
                "Completed: {} frame(s), {} file(s) saved",
                frames_completed,
                saved.len()
            );
            Ok(())
        }
        ShotOutcome::Aborted { frames_completed } => {
            println!(
                "Aborted after {} frame(s), {} file(s) saved",
                frames_completed,
                saved.len()
            );
            Ok(())
        }
        ShotOutcome::Failed {
            error,
            frames_completed,
        } => {
            eprintln!(
                "Failed after {} frame(s), {} file(s) saved",
                frames_completed,
                saved.len()
            );
            Err(error.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(mode: PhotoMode) -> ShootOptions {
        ShootOptions {
            mode,
            api: CameraApi::RequestBased,
            frames: Some(5),
            stops: Some(1.0),
            raw: true,
            flash: None,
            output: None,
            duration: 1,
        }
    }

    #[test]
    fn test_frames_override_targets_mode() {
        let mut settings = CaptureSettings::default();
        apply_overrides(&mut settings, &options(PhotoMode::ExpoBracketing));
        assert_eq!(settings.expo_bracketing_images, 5);
        assert_eq!(settings.expo_bracketing_stops, 1.0);
        assert_eq!(settings.output, OutputFormat::JpegAndRaw);

        let mut settings = CaptureSettings::default();
        apply_overrides(&mut settings, &options(PhotoMode::Single));
        assert_eq!(settings.repeat, RepeatMode::Count(5));
    }
}
