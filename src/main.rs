//! Head pose broadcaster: per-face head pose estimation and transform publishing.

use anyhow::{Context, Result};
use clap::Parser;
use head_pose_broadcaster::{
    app::{AppConfig, FrameSource, HeadPoseApp, ReplaySource, ReportMode},
    config::Config,
    estimator::HeadPoseEstimator,
    provider::{Fixture, FixtureProvider, LandmarkProvider},
    publisher::LogBroadcaster,
};
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Replay a recorded landmark fixture (YAML) instead of running a detector
    #[arg(long, conflicts_with_all = ["image", "camera", "video"])]
    replay: Option<PathBuf>,

    /// Process a single still image
    #[arg(long, conflicts_with_all = ["camera", "video"])]
    image: Option<PathBuf>,

    /// Camera index to use
    #[arg(long, conflicts_with = "video")]
    camera: Option<i32>,

    /// Video file to process
    #[arg(short, long)]
    video: Option<String>,

    /// Report landmarks or poses
    #[arg(short, long, value_enum, default_value = "pose")]
    mode: ReportMode,

    /// Broadcast one transform per solved face
    #[arg(short, long)]
    publish: bool,

    /// Prefix of published face frames
    #[arg(long)]
    prefix: Option<String>,

    /// Focal length in pixels (0 marks the camera as uncalibrated)
    #[arg(short, long)]
    focal_length: Option<f64>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<usize>,

    /// Print the example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(prefix) = &args.prefix {
        config.publisher.prefix.clone_from(prefix);
    }
    if let Some(f) = args.focal_length {
        config.camera.focal_length = Some(f);
    }

    config.validate()?;
    Ok(config)
}

fn run<P, S>(config: &Config, provider: P, source: S, app_config: AppConfig) -> Result<()>
where
    P: LandmarkProvider,
    S: FrameSource,
{
    let estimator = HeadPoseEstimator::new(provider, config.camera_model(), config.pose_solver()?)
        .with_previous_frame_seeding(config.solver.seed_from_previous_frame);
    let level = if app_config.publish {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    let mut app = HeadPoseApp::new(
        estimator,
        source,
        config.frame_publisher(),
        LogBroadcaster::new(level),
        &config.camera.frame_id,
        app_config,
    );

    let stdout = std::io::stdout();
    app.run(&mut stdout.lock())?;
    Ok(())
}

#[cfg(feature = "opencv")]
fn native_provider(config: &Config) -> Result<head_pose_broadcaster::provider::OnnxLandmarkProvider> {
    use head_pose_broadcaster::provider::onnx::OnnxProviderOptions;

    config.validate_detection_models()?;
    let options = OnnxProviderOptions {
        score_threshold: config.detection.score_threshold,
        nms_threshold: config.detection.nms_threshold,
        max_faces: config.detection.max_faces,
        bbox_expansion: config.detection.bbox_expansion,
    };
    Ok(head_pose_broadcaster::provider::OnnxLandmarkProvider::new(
        &config.detection.face_detector,
        &config.detection.landmark_model,
        options,
    )?)
}

#[cfg(feature = "opencv")]
fn run_live(args: &Args, config: &Config, app_config: AppConfig) -> Result<()> {
    use head_pose_broadcaster::app::{StillImageSource, VideoSource};

    let provider = native_provider(config)?;
    if let Some(path) = &args.image {
        return run(config, provider, StillImageSource::open(path)?, app_config);
    }
    let source = match &args.video {
        Some(path) => VideoSource::file(path)?,
        None => VideoSource::camera(args.camera.unwrap_or(0))?,
    };
    run(config, provider, source, app_config)
}

#[cfg(not(feature = "opencv"))]
fn run_live(args: &Args, _config: &Config, _app_config: AppConfig) -> Result<()> {
    if args.image.is_some() || args.camera.is_some() || args.video.is_some() {
        anyhow::bail!("Live detection requires building with the `opencv` feature; use --replay with a landmark fixture");
    }
    anyhow::bail!("No input given; use --replay <fixture.yaml>")
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    if args.print_config {
        print!("{}", head_pose_broadcaster::config::EXAMPLE_CONFIG);
        return Ok(());
    }

    info!("Head Pose Broadcaster");

    let config = load_config(&args)?;
    let app_config = AppConfig {
        mode: args.mode,
        publish: args.publish,
        max_frames: args.frames,
    };

    if let Some(path) = &args.replay {
        let fixture = Fixture::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?;
        let provider = FixtureProvider::from_fixture(&fixture);
        return run(&config, provider, ReplaySource::new(fixture.frames), app_config);
    }

    run_live(&args, &config, app_config)
}
