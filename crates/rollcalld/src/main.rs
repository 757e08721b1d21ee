use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{read_enrollment_dir, Config, EncodingStore, OnnxAnalyzer};
use rollcall_hw::{Camera, FrameSource, ImageSequence};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod engine;
mod overlay;

use engine::{LiveLoop, LoopSummary, StopReason};

/// Below this, the ArcFace analyzer almost never matches the same person:
/// its normalised embeddings sit roughly 0.8 to 1.1 apart across photos.
const ARCFACE_MIN_THRESHOLD: f32 = 0.8;

fn threshold_too_strict(threshold: f32) -> bool {
    threshold < ARCFACE_MIN_THRESHOLD
}

#[derive(Parser)]
#[command(name = "rollcalld", about = "Live face recognition attendance", version)]
struct Args {
    /// Replay a directory of images instead of opening the camera
    #[arg(long, value_name = "DIR")]
    frames: Option<PathBuf>,

    /// Capture device index (/dev/videoN)
    #[arg(long)]
    camera: Option<u32>,

    /// Directory of enrollment images named <roll>_<Name>.<ext>
    #[arg(long, value_name = "DIR")]
    enrollment_dir: Option<PathBuf>,

    /// Attendance CSV file
    #[arg(long, value_name = "FILE")]
    attendance: Option<PathBuf>,

    /// Maximum embedding distance for a match
    #[arg(long)]
    threshold: Option<f32>,

    /// Write an annotated frame to this path after every frame
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(index) = self.camera {
            config.camera_index = index;
        }
        if let Some(dir) = &self.enrollment_dir {
            config.enrollment_dir = dir.clone();
        }
        if let Some(path) = &self.attendance {
            config.attendance_path = path.clone();
        }
        if let Some(threshold) = self.threshold {
            config.distance_threshold = threshold;
        }
        if let Some(path) = &self.snapshot {
            config.snapshot_path = Some(path.clone());
        }
        if let Some(limit) = self.max_frames {
            config.max_frames = limit;
        }
        config
    }
}

fn open_source(frames: Option<&PathBuf>, config: &Config) -> Result<Box<dyn FrameSource>> {
    match frames {
        Some(dir) => Ok(Box::new(ImageSequence::open(dir)?)),
        None => {
            let device = config.camera_device();
            let camera = Camera::open(&device)
                .with_context(|| format!("cannot open capture device {device}"))?;
            Ok(Box::new(camera))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.apply(Config::load()?);
    config.validate()?;

    tracing::info!("rollcalld starting");

    let images = read_enrollment_dir(&config.enrollment_dir)?;
    engine::ensure_enrolled(images.len())?;

    if threshold_too_strict(config.distance_threshold) {
        tracing::warn!(
            threshold = config.distance_threshold,
            suggested = ARCFACE_MIN_THRESHOLD,
            "distance threshold is strict for ArcFace embeddings; few faces will match"
        );
    }
    let mut analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let (store, report) = EncodingStore::build(&mut analyzer, &images);
    tracing::info!(
        enrolled = report.enrolled,
        no_face = report.no_face,
        failed = report.failed,
        "encoding complete"
    );
    engine::ensure_enrolled(store.len())?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut live = LiveLoop::new(store, &config);

    let loop_stop = stop.clone();
    let frames = args.frames.clone();
    let handle = std::thread::Builder::new()
        .name("rollcall-loop".into())
        .spawn(move || -> Result<LoopSummary> {
            let source = open_source(frames.as_ref(), &config)?;
            Ok(live.run(&mut analyzer, source, &loop_stop)?)
        })
        .context("failed to spawn live loop thread")?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested, finishing current frame");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| anyhow::anyhow!("live loop thread panicked"))??;

    if summary.stop_reason == StopReason::DeviceFailure {
        tracing::warn!("capture device stopped delivering frames");
    }
    tracing::info!(
        frames = summary.frames,
        faces = summary.faces,
        recorded = summary.recorded,
        "rollcalld shutting down"
    );

    Ok(())
}
