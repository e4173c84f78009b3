// SPDX-License-Identifier: GPL-3.0-only

use camera_shot::backends::camera::types::{CameraApi, FlashMode};
use camera_shot::pipelines::photo::PhotoMode;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-shot")]
#[command(about = "Multi-frame shot orchestration against a virtual camera")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ApiArg {
    Legacy,
    Request,
}

impl From<ApiArg> for CameraApi {
    fn from(api: ApiArg) -> Self {
        match api {
            ApiArg::Legacy => CameraApi::Legacy,
            ApiArg::Request => CameraApi::RequestBased,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Single,
    Dro,
    Hdr,
    Panorama,
    ExpoBracketing,
    FocusBracketing,
    FastBurst,
    NoiseReduction,
}

impl From<ModeArg> for PhotoMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => PhotoMode::Single,
            ModeArg::Dro => PhotoMode::Dro,
            ModeArg::Hdr => PhotoMode::Hdr,
            ModeArg::Panorama => PhotoMode::Panorama,
            ModeArg::ExpoBracketing => PhotoMode::ExpoBracketing,
            ModeArg::FocusBracketing => PhotoMode::FocusBracketing,
            ModeArg::FastBurst => PhotoMode::FastBurst,
            ModeArg::NoiseReduction => PhotoMode::NoiseReduction,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FlashArg {
    Off,
    Auto,
    On,
    Torch,
}

impl From<FlashArg> for FlashMode {
    fn from(flash: FlashArg) -> Self {
        match flash {
            FlashArg::Off => FlashMode::Off,
            FlashArg::Auto => FlashMode::Auto,
            FlashArg::On => FlashMode::On,
            FlashArg::Torch => FlashMode::Torch,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the capability snapshot of a device API
    Capabilities {
        /// Device API to query
        #[arg(short, long, value_enum, default_value = "request")]
        api: ApiArg,
    },

    /// Run a shot against the virtual camera
    Shoot {
        /// Photo mode
        #[arg(short, long, value_enum, default_value = "single")]
        mode: ModeArg,

        /// Device API to use
        #[arg(short, long, value_enum, default_value = "request")]
        api: ApiArg,

        /// Frame count (bracket size, burst length or repeat count)
        #[arg(short, long)]
        frames: Option<u32>,

        /// Stop interval for exposure brackets and HDR
        #[arg(short, long)]
        stops: Option<f32>,

        /// Save RAW alongside JPEG
        #[arg(long)]
        raw: bool,

        /// Flash mode
        #[arg(long, value_enum)]
        flash: Option<FlashArg>,

        /// Output directory (default: ~/Pictures/Camera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds before an unbounded shot is stopped
        #[arg(short, long, default_value = "3")]
        duration: u64,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_shot=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capabilities { api } => cli::print_capabilities(api.into()),
        Commands::Shoot {
            mode,
            api,
            frames,
            stops,
            raw,
            flash,
            output,
            duration,
        } => cli::shoot(cli::ShootOptions {
            mode: mode.into(),
            api: api.into(),
            frames,
            stops,
            raw,
            flash: flash.map(Into::into),
            output,
            duration,
        }),
        Commands::Config => cli::print_config(),
    }
}
