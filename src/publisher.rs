//! Frame Publisher: turns solved poses into named, timestamped transforms.

use crate::{
    constants::{DEFAULT_FRAME_PREFIX, DEFAULT_UNIT_SCALE},
    pose_estimation::FacePose,
    Result,
};
use nalgebra::{UnitQuaternion, Vector3};
use std::time::Duration;

/// Transform of one face frame relative to the camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    /// Time the transform is valid at, since the Unix epoch
    pub stamp: Duration,
    /// Camera reference frame
    pub parent_frame: String,
    /// Face frame, `<prefix>_<face_index>`
    pub child_frame: String,
    /// Head origin in the camera frame, in published units
    pub translation: Vector3<f64>,
    /// Head-to-camera rotation
    pub rotation: UnitQuaternion<f64>,
}

/// Sink for transforms and face counts (the messaging layer)
pub trait TransformBroadcaster {
    /// Broadcast one transform
    ///
    /// # Errors
    ///
    /// Returns an error if the transform cannot be delivered.
    fn send_transform(&mut self, transform: &StampedTransform) -> Result<()>;

    /// Report how many faces were detected in the current frame
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be delivered.
    fn publish_face_count(&mut self, count: usize) -> Result<()>;
}

impl<B: TransformBroadcaster + ?Sized> TransformBroadcaster for Box<B> {
    fn send_transform(&mut self, transform: &StampedTransform) -> Result<()> {
        (**self).send_transform(transform)
    }

    fn publish_face_count(&mut self, count: usize) -> Result<()> {
        (**self).publish_face_count(count)
    }
}

/// Broadcaster writing everything to the log at a fixed level
#[derive(Debug, Clone, Copy)]
pub struct LogBroadcaster {
    level: log::Level,
}

impl LogBroadcaster {
    /// Broadcaster logging at `level`
    #[must_use]
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(log::Level::Info)
    }
}

impl TransformBroadcaster for LogBroadcaster {
    fn send_transform(&mut self, transform: &StampedTransform) -> Result<()> {
        let t = transform.translation;
        let q = transform.rotation.quaternion();
        log::log!(
            self.level,
            "{} -> {} @ {:.6}s: t=({:.4}, {:.4}, {:.4}) q=({:.4}, {:.4}, {:.4}, {:.4})",
            transform.parent_frame,
            transform.child_frame,
            transform.stamp.as_secs_f64(),
            t.x,
            t.y,
            t.z,
            q.i,
            q.j,
            q.k,
            q.w
        );
        Ok(())
    }

    fn publish_face_count(&mut self, count: usize) -> Result<()> {
        log::log!(self.level, "Detected faces: {count}");
        Ok(())
    }
}

/// Builds and sends one transform per solved face
#[derive(Debug, Clone, PartialEq)]
pub struct FramePublisher {
    prefix: String,
    future_dating: Duration,
    unit_scale: f64,
}

impl FramePublisher {
    /// Publisher naming frames `<prefix>_<face_index>`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            future_dating: Duration::ZERO,
            unit_scale: DEFAULT_UNIT_SCALE,
        }
    }

    /// Stamp transforms this far past the acquisition time, to compensate for
    /// detection latency
    #[must_use]
    pub fn with_future_dating(mut self, offset: Duration) -> Self {
        self.future_dating = offset;
        self
    }

    /// Multiply translations by `scale` (model millimetres to metres by default)
    #[must_use]
    pub fn with_unit_scale(mut self, scale: f64) -> Self {
        self.unit_scale = scale;
        self
    }

    /// Frame name prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name of the frame published for a face
    #[must_use]
    pub fn child_frame(&self, face_index: usize) -> String {
        format!("{}_{}", self.prefix, face_index)
    }

    /// Transform for one solved face
    #[must_use]
    pub fn transform_for(&self, face: &FacePose, camera_frame: &str, acquired: Duration) -> StampedTransform {
        StampedTransform {
            stamp: acquired + self.future_dating,
            parent_frame: camera_frame.to_string(),
            child_frame: self.child_frame(face.face_index),
            translation: face.pose.translation * self.unit_scale,
            rotation: face.pose.quaternion(),
        }
    }

    /// Publish the face count and one transform per solved face.
    ///
    /// A failed delivery is logged and does not stop the remaining ones.
    /// Returns the number of transforms delivered.
    pub fn publish<B: TransformBroadcaster + ?Sized>(
        &self,
        broadcaster: &mut B,
        camera_frame: &str,
        acquired: Duration,
        detected_faces: usize,
        poses: &[FacePose],
    ) -> usize {
        if let Err(e) = broadcaster.publish_face_count(detected_faces) {
            log::warn!("Failed to publish face count: {e}");
        }

        let mut sent = 0;
        for face in poses {
            let transform = self.transform_for(face, camera_frame, acquired);
            match broadcaster.send_transform(&transform) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!("Failed to publish {}: {e}", transform.child_frame),
            }
        }
        sent
    }
}

impl Default for FramePublisher {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{face_model::FaceModel, pose_estimation::Pose, Error};

    #[derive(Default)]
    struct Recorder {
        transforms: Vec<StampedTransform>,
        counts: Vec<usize>,
        fail_on: Option<String>,
    }

    impl TransformBroadcaster for Recorder {
        fn send_transform(&mut self, transform: &StampedTransform) -> Result<()> {
            if self.fail_on.as_deref() == Some(transform.child_frame.as_str()) {
                return Err(Error::PublishError("link down".to_string()));
            }
            self.transforms.push(transform.clone());
            Ok(())
        }

        fn publish_face_count(&mut self, count: usize) -> Result<()> {
            self.counts.push(count);
            Ok(())
        }
    }

    fn face(face_index: usize, z: f64) -> FacePose {
        FacePose {
            face_index,
            pose: Pose::new(FaceModel::frontal_rotation(), Vector3::new(100.0, -50.0, z)),
            reprojection_rms: 0.1,
        }
    }

    #[test]
    fn test_transform_naming_stamp_and_scale() {
        let publisher = FramePublisher::new("head").with_future_dating(Duration::from_millis(50));
        let t = publisher.transform_for(&face(2, 600.0), "camera", Duration::from_secs(10));

        assert_eq!(t.child_frame, "head_2");
        assert_eq!(t.parent_frame, "camera");
        assert_eq!(t.stamp, Duration::from_millis(10_050));
        assert!((t.translation - Vector3::new(0.1, -0.05, 0.6)).norm() < 1e-12);
        assert!(t.rotation.angle_to(&FaceModel::frontal_rotation().into()) < 1e-12);
    }

    #[test]
    fn test_publish_counts_detected_faces() {
        let publisher = FramePublisher::default().with_unit_scale(1.0);
        let mut recorder = Recorder::default();

        // Face 1 was detected but not solved
        let poses = vec![face(0, 500.0), face(2, 700.0)];
        let sent = publisher.publish(&mut recorder, "camera", Duration::ZERO, 3, &poses);

        assert_eq!(sent, 2);
        assert_eq!(recorder.counts, vec![3]);
        let names: Vec<&str> = recorder.transforms.iter().map(|t| t.child_frame.as_str()).collect();
        assert_eq!(names, vec!["face_0", "face_2"]);
        assert_eq!(recorder.transforms[1].translation.z, 700.0);
    }

    #[test]
    fn test_failed_delivery_does_not_stop_others() {
        let publisher = FramePublisher::default();
        let mut recorder = Recorder {
            fail_on: Some("face_0".to_string()),
            ..Recorder::default()
        };

        let sent = publisher.publish(&mut recorder, "camera", Duration::ZERO, 2, &[face(0, 1.0), face(1, 1.0)]);
        assert_eq!(sent, 1);
        assert_eq!(recorder.transforms[0].child_frame, "face_1");
    }

    #[test]
    fn test_log_broadcaster_accepts_everything() {
        let mut log = LogBroadcaster::default();
        let publisher = FramePublisher::default();
        assert_eq!(publisher.publish(&mut log, "camera", Duration::ZERO, 1, &[face(0, 600.0)]), 1);
    }
}
