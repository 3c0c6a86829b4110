//! Camera-info driven publishing loop body.

use crate::{
    camera::CameraInfo,
    estimator::HeadPoseEstimator,
    publisher::{FramePublisher, TransformBroadcaster},
    provider::LandmarkProvider,
    utils::image_conversion::is_zero_area,
};
use ndarray::ArrayView3;
use std::time::Duration;

/// What one frame produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Faces reported by the landmark provider
    pub detected_faces: usize,
    /// Transforms delivered to the broadcaster
    pub published: usize,
}

/// Estimator, publisher and broadcaster wired together.
///
/// Each frame optionally carries the camera-info message received with it.
/// Errors never escape a frame: they are logged and the frame yields fewer
/// results.
pub struct HeadPoseNode<P, B> {
    estimator: HeadPoseEstimator<P>,
    publisher: FramePublisher,
    broadcaster: B,
    camera_frame: String,
}

impl<P: LandmarkProvider, B: TransformBroadcaster> HeadPoseNode<P, B> {
    /// Create a node publishing relative to `camera_frame`
    pub fn new(
        estimator: HeadPoseEstimator<P>,
        publisher: FramePublisher,
        broadcaster: B,
        camera_frame: impl Into<String>,
    ) -> Self {
        Self {
            estimator,
            publisher,
            broadcaster,
            camera_frame: camera_frame.into(),
        }
    }

    /// Process one frame acquired at `acquired` (time since the Unix epoch).
    ///
    /// Zero-area frames publish nothing, not even a face count.
    pub fn on_frame(
        &mut self,
        image: ArrayView3<'_, u8>,
        acquired: Duration,
        camera_info: Option<&CameraInfo>,
    ) -> FrameOutcome {
        if let Some(info) = camera_info {
            self.estimator.apply_camera_info(info);
            if !info.frame_id.is_empty() && info.frame_id != self.camera_frame {
                log::debug!("Camera frame is now {}", info.frame_id);
                self.camera_frame.clone_from(&info.frame_id);
            }
        }

        let detected_faces = match self.estimator.update(image.view()) {
            Ok(_) if is_zero_area(&image) => return FrameOutcome::default(),
            Ok(count) => count,
            Err(e) => {
                log::warn!("Frame skipped: {e}");
                return FrameOutcome::default();
            }
        };

        let poses = self.estimator.poses().to_vec();
        let published = self.publisher.publish(
            &mut self.broadcaster,
            &self.camera_frame,
            acquired,
            detected_faces,
            &poses,
        );

        FrameOutcome {
            detected_faces,
            published,
        }
    }

    /// The estimator, for landmark access between frames
    pub fn estimator_mut(&mut self) -> &mut HeadPoseEstimator<P> {
        &mut self.estimator
    }

    /// The broadcaster
    pub fn broadcaster(&self) -> &B {
        &self.broadcaster
    }

    /// Current camera frame name
    #[must_use]
    pub fn camera_frame(&self) -> &str {
        &self.camera_frame
    }
}
