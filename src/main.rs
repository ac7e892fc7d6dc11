use crate::capture::SyntheticSource;
use crate::config::{CaptureMode, PipelineConfig, app_name, version};
use crate::display::NullSurface;
use crate::pipeline::{PipelineCoordinator, PipelineOptions};
use crate::utils::path::default_saving_path;
use clap::{Arg, ArgAction, Command};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};
use tokio_util::sync::CancellationToken;

pub mod capture;
pub mod compose;
pub mod config;
pub mod display;
pub mod frame;
pub mod pipeline;
pub mod recorder;
pub mod segment;
pub mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Directory recordings and photos are written to."),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON pipeline configuration file."),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .default_value("10")
                .help("How long to run the capture loop."),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .default_value("640")
                .help("Synthetic camera width."),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .default_value("480")
                .help("Synthetic camera height."),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("RATE")
                .default_value("30")
                .help("Synthetic camera frame rate."),
        )
        .arg(
            Arg::new("background")
                .short('b')
                .long("background")
                .value_name("IMAGE")
                .action(ArgAction::Append)
                .help("Background image, may be given multiple times."),
        )
        .arg(
            Arg::new("record")
                .short('r')
                .long("record")
                .action(ArgAction::SetTrue)
                .help("Record a chroma-keyed MP4 for the whole run."),
        )
        .arg(
            Arg::new("photo")
                .short('p')
                .long("photo")
                .action(ArgAction::SetTrue)
                .help("Capture one alpha-matted photo halfway through."),
        )
        .arg(
            Arg::new("audio")
                .short('a')
                .long("audio")
                .action(ArgAction::SetTrue)
                .help("Capture microphone audio into recordings."),
        )
        .arg(
            Arg::new("no-binarize")
                .long("no-binarize")
                .action(ArgAction::SetTrue)
                .help("Use raw depth values as mask weights instead of a hard cutoff."),
        )
        .arg(
            Arg::new("no-smoothing")
                .long("no-smoothing")
                .action(ArgAction::SetTrue)
                .help("Keep the foreground mask hard-edged."),
        )
        .arg(
            Arg::new("no-segmentation")
                .long("no-segmentation")
                .action(ArgAction::SetTrue)
                .help("Show the raw feed without depth segmentation."),
        )
        .get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => PipelineConfig::load(std::path::Path::new(path))?,
        None => PipelineConfig::default(),
    };
    if let Some(backgrounds) = matches.get_many::<String>("background") {
        config.backgrounds = backgrounds.map(PathBuf::from).collect();
    }
    if matches.get_flag("no-binarize") {
        config.binarize = false;
    }
    if matches.get_flag("no-smoothing") {
        config.smoothing = false;
    }
    if matches.get_flag("no-segmentation") {
        config.segmentation = false;
    }
    let record = matches.get_flag("record");
    let photo = matches.get_flag("photo");
    if record {
        config.capture_mode = CaptureMode::Video;
    }

    let output_dir = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(default_saving_path);
    let duration: f64 = matches
        .get_one::<String>("duration")
        .unwrap()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid duration"))?;
    let width: usize = matches.get_one::<String>("width").unwrap().parse()?;
    let height: usize = matches.get_one::<String>("height").unwrap().parse()?;
    let fps: u32 = matches.get_one::<String>("fps").unwrap().parse()?;

    let source = Box::new(SyntheticSource::new(width, height, fps, None));
    let coordinator = PipelineCoordinator::launch(
        source,
        PipelineOptions {
            config,
            output_dir,
            audio: matches.get_flag("audio"),
            surface: Arc::new(NullSurface),
        },
    )?;

    // gracefully close when receiving SIGINT, SIGTERM, or SIGHUP
    let cancel = coordinator.cancel_token();
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .expect("Error setting Ctrl-C handler");

    if record {
        let path = coordinator.start_recording().await?;
        info!("Recording to {}", path.display());
    }

    let cancel = coordinator.cancel_token();
    if photo {
        wait_or_cancel(Duration::from_secs_f64(duration / 2.0), &cancel).await;
        if !cancel.is_cancelled() {
            match coordinator.capture_photo().await {
                Ok(path) => info!("Photo saved to {}", path.display()),
                Err(e) => error!("Photo capture failed: {e:#}"),
            }
        }
        wait_or_cancel(Duration::from_secs_f64(duration / 2.0), &cancel).await;
    } else {
        wait_or_cancel(Duration::from_secs_f64(duration), &cancel).await;
    }

    if record {
        match coordinator.stop_recording().await {
            Ok(path) => info!("Recording finished: {}", path.display()),
            Err(e) => error!("Recording failed: {e:#}"),
        }
    }

    coordinator.stop();
    coordinator.wait().await
}

async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
