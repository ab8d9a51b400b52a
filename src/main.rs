use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use pose_silhouette::{
    EngineConfig,
    config::FeatherConfig,
    pipeline::{
        Effect, FrameSource, ImageSequenceSource, RenderScheduler, SkipReason, StaticImageSource,
        TickOutcome, compositor, start_movenet,
    },
};

/// Give up once no frame has been written for this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(version, about = "Pose-driven silhouettes, luma mattes and difference masks")]
struct Args {
    /// TOML configuration; missing keys fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Live input: a single image or a directory of frames. Ignored when
    /// `--camera` is given.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Live input from a camera index.
    #[cfg(feature = "camera-nokhwa")]
    #[arg(long)]
    camera: Option<u32>,

    /// Print the available cameras and exit.
    #[cfg(feature = "camera-nokhwa")]
    #[arg(long)]
    list_cameras: bool,

    /// Target silhouette: a single image or a directory of frames.
    #[arg(long)]
    target: Option<PathBuf>,

    /// Comma-separated effects: skeleton, bbox, segment, difference, matte.
    #[arg(long, value_delimiter = ',')]
    effects: Vec<Effect>,

    /// Number of frames to draw. Defaults to the sequence length, or one
    /// frame for a still image.
    #[arg(long)]
    frames: Option<usize>,

    #[arg(long, default_value_t = 30.0)]
    fps: f32,

    /// Directory receiving frame_XXXXX.png files.
    #[arg(long, default_value = "out")]
    output: PathBuf,

    /// Overrides `estimator.model_path`.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Blend colour over `overlay.flatten_background`; alpha still carries
    /// the matte.
    #[arg(long)]
    flatten: bool,

    /// Grow and blur the segment silhouette instead of keeping hard edges.
    /// Overrides `silhouette.feather`.
    #[arg(long)]
    soft_edges: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    #[cfg(feature = "camera-nokhwa")]
    if args.list_cameras {
        for camera in pose_silhouette::pipeline::available_cameras()? {
            println!("{}: {}", camera.index, camera.label);
        }
        return Ok(());
    }

    let mut cfg = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(model) = &args.model {
        cfg.estimator.model_path = model.clone();
    }
    if args.soft_edges {
        cfg.silhouette.feather = FeatherConfig::soft();
    }
    if !(args.fps.is_finite() && args.fps > 0.0) {
        return Err(anyhow!("--fps must be positive, got {}", args.fps));
    }

    let (live, default_frames) = open_live_source(&args)?;
    let frame_budget = args.frames.unwrap_or(default_frames);

    let mut scheduler = RenderScheduler::new(cfg.clone())?;
    if args.effects.iter().any(|effect| effect.consumes_pose()) {
        scheduler.set_keypoint_source(Box::new(start_movenet(cfg.estimator.clone())));
    }
    if let Some(path) = &args.target {
        // a target clip loops under a longer live stream
        let (target, _) = open_path_source(path, true)?;
        scheduler.set_target_source(target);
    }
    for effect in &args.effects {
        scheduler
            .enable(*effect)
            .with_context(|| format!("failed to enable {effect}"))?;
    }
    scheduler.set_frame_source(live);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let frame_interval = Duration::from_secs_f32(1.0 / args.fps);
    let mut drawn = 0usize;
    let mut last_drawn = Instant::now();

    while drawn < frame_budget {
        let started = Instant::now();
        match scheduler.tick() {
            TickOutcome::Drawn { tick, .. } if scheduler.awaiting_first_estimate() => {
                // pose layers would be empty; keep the frame out of the budget
                log::debug!("tick {tick}: waiting for the first pose estimate");
                if last_drawn.elapsed() > IDLE_TIMEOUT {
                    log::warn!("no pose estimate after {IDLE_TIMEOUT:?}, giving up");
                    break;
                }
            }
            TickOutcome::Drawn { tick, .. } => {
                let path = args.output.join(format!("frame_{drawn:05}.png"));
                let saved = if args.flatten {
                    compositor::flatten_onto(
                        scheduler.output(),
                        cfg.overlay.flatten_background,
                    )
                    .save(&path)
                } else {
                    scheduler.output().save(&path)
                };
                saved.with_context(|| format!("failed to write {}", path.display()))?;
                match scheduler.current_score() {
                    Some(score) => log::info!("tick {tick}: score {}", score.display_text()),
                    None => log::debug!("tick {tick}: wrote {}", path.display()),
                }
                drawn += 1;
                last_drawn = Instant::now();
            }
            TickOutcome::Skipped(SkipReason::RenderFailed) => {
                log::warn!("frame skipped: render failed");
            }
            TickOutcome::Skipped(reason) => {
                log::trace!("frame skipped: {reason:?}");
                if last_drawn.elapsed() > IDLE_TIMEOUT {
                    log::warn!("no frame drawn for {IDLE_TIMEOUT:?}, giving up");
                    break;
                }
            }
            TickOutcome::Stopped => break,
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    scheduler.destroy();
    log::info!("wrote {drawn} frame(s) to {}", args.output.display());
    Ok(())
}

fn open_live_source(args: &Args) -> Result<(Box<dyn FrameSource>, usize)> {
    #[cfg(feature = "camera-nokhwa")]
    if let Some(index) = args.camera {
        let camera = pose_silhouette::pipeline::CameraFrameSource::open(index)?;
        return Ok((Box::new(camera), usize::MAX));
    }

    let path = args
        .input
        .as_deref()
        .ok_or_else(|| anyhow!("no live input given (use --input or --camera)"))?;
    open_path_source(path, false)
}

/// A directory becomes a frame sequence; anything else is read as one image.
fn open_path_source(path: &Path, looping: bool) -> Result<(Box<dyn FrameSource>, usize)> {
    if path.is_dir() {
        let sequence = ImageSequenceSource::from_dir(path)?.with_looping(looping);
        let len = sequence.len();
        Ok((Box::new(sequence), len))
    } else {
        Ok((Box::new(StaticImageSource::open(path)?), 1))
    }
}
