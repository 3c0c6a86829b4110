//! Main application module: frame sources and the frame-at-a-time run loop.

use crate::{
    camera::CameraInfo,
    error::{Error, Result},
    estimator::HeadPoseEstimator,
    node::HeadPoseNode,
    provider::{FixtureFrame, LandmarkProvider},
    publisher::{FramePublisher, TransformBroadcaster},
    report::{landmark_report, pose_report},
    utils::image_conversion::load_bgr_image,
};
use log::{debug, info};
use ndarray::Array3;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// What the report line of each frame contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportMode {
    /// 69 landmark points per face
    Landmarks,
    /// Yaw, pitch, roll and position per face
    Pose,
}

/// One acquired frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// BGR pixels shaped `(height, width, 3)`
    pub image: Array3<u8>,
    /// Acquisition time since the Unix epoch
    pub acquired: Duration,
    /// Calibration received with this frame
    pub camera_info: Option<CameraInfo>,
}

/// Blocking source of frames
pub trait FrameSource {
    /// Wait for the next frame; `None` once the source is exhausted
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the underlying device fails.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Frames described by a landmark fixture: blank images of the recorded
/// size, recorded stamps and camera-info messages
pub struct ReplaySource {
    frames: std::vec::IntoIter<FixtureFrame>,
}

impl ReplaySource {
    /// Replay the given fixture frames
    #[must_use]
    pub fn new(frames: Vec<FixtureFrame>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.next().map(|frame| Frame {
            image: Array3::zeros((frame.height, frame.width, 3)),
            acquired: Duration::try_from_secs_f64(frame.stamp).unwrap_or_default(),
            camera_info: frame.camera_info,
        }))
    }
}

/// A single decoded still image
pub struct StillImageSource {
    image: Option<Array3<u8>>,
}

impl StillImageSource {
    /// Decode an image file
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the image cannot be loaded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening image file: {}", path.display());
        let image = load_bgr_image(path)
            .map_err(|e| Error::SourceUnavailable(format!("{}: {e}", path.display())))?;
        Ok(Self { image: Some(image) })
    }

    /// Wrap an already decoded frame
    #[must_use]
    pub fn from_array(image: Array3<u8>) -> Self {
        Self { image: Some(image) }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.image.take().map(|image| Frame {
            image,
            acquired: now(),
            camera_info: None,
        }))
    }
}

#[cfg(feature = "opencv")]
pub use video::VideoSource;

#[cfg(feature = "opencv")]
mod video {
    use super::{now, Frame, FrameSource};
    use crate::{utils::image_conversion::mat_to_array, Error, Result};
    use log::{info, warn};
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{self, VideoCapture, CAP_PROP_BUFFERSIZE},
    };

    /// Frames from a webcam or a video file
    pub struct VideoSource {
        capture: VideoCapture,
        live: bool,
    }

    impl VideoSource {
        /// Open a camera by index
        ///
        /// # Errors
        ///
        /// Returns [`Error::SourceUnavailable`] if the camera cannot be opened.
        pub fn camera(index: i32) -> Result<Self> {
            info!("Opening camera {index}");
            let mut capture = VideoCapture::new(index, videoio::CAP_ANY)?;
            if !capture.is_opened()? {
                return Err(Error::SourceUnavailable(format!("camera {index}")));
            }
            // Lowest latency: never hand out stale buffered frames
            capture.set(CAP_PROP_BUFFERSIZE, 1.0)?;
            Ok(Self { capture, live: true })
        }

        /// Open a video file
        ///
        /// # Errors
        ///
        /// Returns [`Error::SourceUnavailable`] if the file cannot be opened.
        pub fn file(path: &str) -> Result<Self> {
            info!("Opening video file: {path}");
            let capture = VideoCapture::from_file(path, videoio::CAP_ANY)?;
            if !capture.is_opened()? {
                return Err(Error::SourceUnavailable(path.to_string()));
            }
            Ok(Self { capture, live: false })
        }
    }

    impl FrameSource for VideoSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let mut mat = Mat::default();
            if !self.capture.read(&mut mat)? || mat.empty() {
                if self.live {
                    warn!("Failed to read frame from camera");
                }
                return Ok(None);
            }
            Ok(Some(Frame {
                image: mat_to_array(&mat)?,
                acquired: now(),
                camera_info: None,
            }))
        }
    }
}

/// Run-loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfig {
    /// Report contents
    pub mode: ReportMode,
    /// Broadcast transforms for every frame
    pub publish: bool,
    /// Stop after this many frames
    pub max_frames: Option<usize>,
}

/// Main application struct
pub struct HeadPoseApp<P, S, B> {
    node: HeadPoseNode<P, B>,
    source: S,
    config: AppConfig,
    stop: Arc<AtomicBool>,
}

impl<P: LandmarkProvider, S: FrameSource, B: TransformBroadcaster> HeadPoseApp<P, S, B> {
    /// Create a new head pose application
    pub fn new(
        estimator: HeadPoseEstimator<P>,
        source: S,
        publisher: FramePublisher,
        broadcaster: B,
        camera_frame: &str,
        config: AppConfig,
    ) -> Self {
        info!("Initializing head pose application");
        Self {
            node: HeadPoseNode::new(estimator, publisher, broadcaster, camera_frame),
            source,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run loop before the next frame when set
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The node driving estimation and publishing
    pub fn node_mut(&mut self) -> &mut HeadPoseNode<P, B> {
        &mut self.node
    }

    /// Process one frame and return its report line
    pub fn process_frame(&mut self, frame: &Frame) -> String {
        if self.config.publish {
            let outcome = self
                .node
                .on_frame(frame.image.view(), frame.acquired, frame.camera_info.as_ref());
            debug!(
                "Frame at {:.3}s: {} face(s), {} transform(s)",
                frame.acquired.as_secs_f64(),
                outcome.detected_faces,
                outcome.published
            );
        } else {
            let estimator = self.node.estimator_mut();
            if let Some(info) = &frame.camera_info {
                estimator.apply_camera_info(info);
            }
            if let Err(e) = estimator.update(frame.image.view()) {
                log::warn!("Frame skipped: {e}");
            }
        }

        let estimator = self.node.estimator_mut();
        match self.config.mode {
            ReportMode::Landmarks => landmark_report(estimator.landmarks()),
            ReportMode::Pose => pose_report(estimator.poses()),
        }
    }

    /// Process frames until the source is exhausted, the frame limit is
    /// reached or the stop flag is set, writing one report line per frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or the output cannot be written.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<usize> {
        let mut processed = 0;

        while !self.stop.load(Ordering::SeqCst) {
            if self.config.max_frames.is_some_and(|max| processed >= max) {
                break;
            }
            let Some(frame) = self.source.next_frame()? else {
                debug!("Frame source exhausted");
                break;
            };

            let line = self.process_frame(&frame);
            writeln!(out, "{line}")?;
            processed += 1;
        }

        info!("Processed {processed} frame(s)");
        Ok(processed)
    }
}
