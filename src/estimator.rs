//! Per-frame orchestration: detection, landmark extraction and pose solving.

use crate::{
    camera::{CameraInfo, CameraModel, Intrinsics},
    landmarks::{extract_landmarks, FaceLandmarks},
    pose_estimation::{FacePose, Pose, PoseSolver},
    provider::LandmarkProvider,
    utils::image_conversion::is_zero_area,
    Result,
};
use nalgebra::Point2;
use ndarray::ArrayView3;

/// Results of the most recent frame
#[derive(Debug, Default)]
struct FrameState {
    intrinsics: Option<Intrinsics>,
    detected_faces: usize,
    landmarks: Vec<FaceLandmarks>,
    poses: Option<Vec<FacePose>>,
}

/// Head pose estimator processing one frame at a time.
///
/// Landmarks are extracted eagerly in [`update`](Self::update); poses are
/// solved on the first call to [`poses`](Self::poses) and cached until the
/// next frame.
pub struct HeadPoseEstimator<P> {
    provider: P,
    camera: CameraModel,
    solver: PoseSolver,
    seed_from_previous_frame: bool,
    previous_poses: Vec<Option<Pose>>,
    uncalibrated_warned: bool,
    frame: FrameState,
}

impl<P: LandmarkProvider> HeadPoseEstimator<P> {
    /// Create an estimator around a landmark provider
    pub fn new(provider: P, camera: CameraModel, solver: PoseSolver) -> Self {
        Self {
            provider,
            camera,
            solver,
            seed_from_previous_frame: false,
            previous_poses: Vec::new(),
            uncalibrated_warned: false,
            frame: FrameState::default(),
        }
    }

    /// Seed each face's solve with the pose of the same face index in the
    /// previous frame. Seeds are hints only; a bad one falls back to a cold start.
    #[must_use]
    pub fn with_previous_frame_seeding(mut self, enabled: bool) -> Self {
        self.seed_from_previous_frame = enabled;
        self
    }

    /// Process one BGR frame and return the number of detected faces.
    ///
    /// Zero-area frames are skipped without running the provider. Faces
    /// whose landmark output violates the provider contract are dropped with
    /// a warning; the other faces of the frame are unaffected.
    ///
    /// # Errors
    ///
    /// Returns an error if the landmark provider fails on this frame.
    pub fn update(&mut self, image: ArrayView3<'_, u8>) -> Result<usize> {
        self.roll_over_seeds();
        self.frame = FrameState::default();

        if is_zero_area(&image) {
            log::debug!("Skipping zero-area frame");
            return Ok(0);
        }

        let (height, width, _) = image.dim();
        self.camera.ensure_initialized(width, height);
        self.frame.intrinsics = self.camera.snapshot();
        self.track_calibration_state();

        let detections = self.provider.detect(image)?;
        self.frame.detected_faces = detections.len();
        log::debug!("Detected {} face(s)", detections.len());

        for (face_index, detection) in detections.iter().enumerate() {
            let raw: Vec<Point2<f64>> = detection.landmarks.iter().map(|p| p.cast::<f64>()).collect();
            match extract_landmarks(&raw) {
                Ok(landmarks) => self.frame.landmarks.push(FaceLandmarks { face_index, landmarks }),
                Err(e) => log::warn!("Dropping face {face_index}: {e}"),
            }
        }

        Ok(self.frame.detected_faces)
    }

    /// Landmark sets of the current frame, in detection order
    #[must_use]
    pub fn landmarks(&self) -> &[FaceLandmarks] {
        &self.frame.landmarks
    }

    /// Solved poses of the current frame, in detection order.
    ///
    /// Empty while the camera is uncalibrated. Faces that cannot be solved
    /// are left out.
    pub fn poses(&mut self) -> &[FacePose] {
        if self.frame.poses.is_none() {
            let solved = self.solve_frame();
            self.frame.poses = Some(solved);
        }
        self.frame.poses.as_deref().unwrap_or_default()
    }

    /// Number of faces the provider reported for the current frame
    #[must_use]
    pub fn detected_faces(&self) -> usize {
        self.frame.detected_faces
    }

    /// Intrinsics used for the current frame
    #[must_use]
    pub fn frame_intrinsics(&self) -> Option<Intrinsics> {
        self.frame.intrinsics
    }

    /// Overwrite the camera calibration; takes effect from the next frame
    pub fn set_calibration(&mut self, focal_length: f64, cx: f64, cy: f64) {
        self.camera.set_calibration(focal_length, cx, cy);
    }

    /// Apply a camera-info message; takes effect from the next frame
    pub fn apply_camera_info(&mut self, info: &CameraInfo) {
        self.camera.apply_camera_info(info);
    }

    /// Camera model
    #[must_use]
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Pose solver
    #[must_use]
    pub fn solver(&self) -> &PoseSolver {
        &self.solver
    }

    /// Landmark provider
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Whether the uncalibrated warning has been emitted and not yet cleared
    #[must_use]
    pub fn is_uncalibrated_warning_active(&self) -> bool {
        self.uncalibrated_warned
    }

    fn track_calibration_state(&mut self) {
        match (self.frame.intrinsics.is_some(), self.uncalibrated_warned) {
            (false, false) => {
                log::warn!("Camera is not calibrated (focal length is zero), pose estimation is paused");
                self.uncalibrated_warned = true;
            }
            (true, true) => {
                log::debug!("Valid camera calibration received, resuming pose estimation");
                self.uncalibrated_warned = false;
            }
            _ => {}
        }
    }

    fn roll_over_seeds(&mut self) {
        self.previous_poses.clear();
        if !self.seed_from_previous_frame {
            return;
        }
        if let Some(poses) = &self.frame.poses {
            for face in poses {
                if self.previous_poses.len() <= face.face_index {
                    self.previous_poses.resize(face.face_index + 1, None);
                }
                self.previous_poses[face.face_index] = Some(face.pose);
            }
        }
    }

    fn solve_frame(&self) -> Vec<FacePose> {
        let Some(intrinsics) = self.frame.intrinsics else {
            return Vec::new();
        };

        self.frame
            .landmarks
            .iter()
            .filter_map(|face| {
                let seed = self.previous_poses.get(face.face_index).copied().flatten();
                match self.solver.solve(&face.landmarks, &intrinsics, seed.as_ref()) {
                    Ok(solution) => Some(FacePose {
                        face_index: face.face_index,
                        pose: solution.pose,
                        reprojection_rms: solution.reprojection_rms,
                    }),
                    Err(e) => {
                        log::warn!("Skipping pose of face {}: {e}", face.face_index);
                        None
                    }
                }
            })
            .collect()
    }
}
