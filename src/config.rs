//! Configuration management for the head pose broadcaster

use crate::{
    camera::CameraModel,
    constants::{
        DEFAULT_CAMERA_FRAME, DEFAULT_CONVERGENCE_EPSILON, DEFAULT_FOCAL_LENGTH, DEFAULT_FRAME_PREFIX,
        DEFAULT_MAX_ITERATIONS, DEFAULT_SEED_ACCEPTANCE_RMS, DEFAULT_UNIT_SCALE,
    },
    face_model::FaceModel,
    pose_estimation::{PoseSolver, SolverOptions},
    publisher::FramePublisher,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera intrinsics and frame name
    pub camera: CameraConfig,

    /// 3-D reference model
    pub face_model: FaceModelConfig,

    /// Pose solver tuning
    pub solver: SolverConfig,

    /// Transform publishing
    pub publisher: PublisherConfig,

    /// Native face detection and landmark models
    pub detection: DetectionConfig,
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Focal length in pixels; `null` uses the image width
    pub focal_length: Option<f64>,

    /// Optical center in pixels; `null` uses the image center
    pub optical_center: Option<[f64; 2]>,

    /// Camera reference frame name
    pub frame_id: String,
}

/// Reference model configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceModelConfig {
    /// Custom `index x y z` table; the built-in model is used when unset
    pub path: Option<PathBuf>,
}

/// Solver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum Levenberg-Marquardt iterations
    pub max_iterations: usize,

    /// Convergence threshold on the update norm
    pub convergence_epsilon: f64,

    /// Seed each face with the previous frame's pose of the same index
    pub seed_from_previous_frame: bool,

    /// Largest RMS reprojection error (pixels) at which a seeded solve is kept
    pub seed_acceptance_rms: f64,
}

/// Publisher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Face frames are named `<prefix>_<face_index>`
    pub prefix: String,

    /// Offset added to the acquisition time, in milliseconds
    pub future_dating_ms: u64,

    /// Multiplier from model units to published units
    pub unit_scale: f64,
}

/// Face detection parameters for the native provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Path to the face detection ONNX model
    pub face_detector: PathBuf,

    /// Path to the 68-point landmark ONNX model
    pub landmark_model: PathBuf,

    /// Confidence threshold for face detection (0.0-1.0)
    pub score_threshold: f32,

    /// IOU threshold for non-maximum suppression (0.0-1.0)
    pub nms_threshold: f32,

    /// Maximum number of faces to detect
    pub max_faces: usize,

    /// Face region expansion factor
    pub bbox_expansion: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal_length: Some(DEFAULT_FOCAL_LENGTH),
            optical_center: None,
            frame_id: DEFAULT_CAMERA_FRAME.to_string(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_epsilon: DEFAULT_CONVERGENCE_EPSILON,
            seed_from_previous_frame: false,
            seed_acceptance_rms: DEFAULT_SEED_ACCEPTANCE_RMS,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_FRAME_PREFIX.to_string(),
            future_dating_ms: 0,
            unit_scale: DEFAULT_UNIT_SCALE,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            face_detector: PathBuf::from("assets/face_detection_yunet.onnx"),
            landmark_model: PathBuf::from("assets/face_landmarks.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
            max_faces: 10,
            bbox_expansion: 0.1,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        serde_yaml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if let Some(f) = self.camera.focal_length {
            if !f.is_finite() || f < 0.0 {
                return Err(Error::ConfigError(
                    "Focal length must be a non-negative number".to_string(),
                ));
            }
        }
        if let Some([cx, cy]) = self.camera.optical_center {
            if !cx.is_finite() || !cy.is_finite() {
                return Err(Error::ConfigError("Optical center must be finite".to_string()));
            }
        }
        if self.camera.frame_id.is_empty() {
            return Err(Error::ConfigError("Camera frame id must not be empty".to_string()));
        }

        if self.solver.max_iterations == 0 {
            return Err(Error::ConfigError(
                "Solver iterations must be greater than 0".to_string(),
            ));
        }
        if !(self.solver.convergence_epsilon > 0.0) {
            return Err(Error::ConfigError(
                "Convergence epsilon must be positive".to_string(),
            ));
        }
        if !(self.solver.seed_acceptance_rms > 0.0) {
            return Err(Error::ConfigError(
                "Seed acceptance error must be positive".to_string(),
            ));
        }

        if self.publisher.prefix.is_empty() {
            return Err(Error::ConfigError("Frame prefix must not be empty".to_string()));
        }
        if !(self.publisher.unit_scale > 0.0) || !self.publisher.unit_scale.is_finite() {
            return Err(Error::ConfigError("Unit scale must be positive".to_string()));
        }

        if !(0.0..=1.0).contains(&self.detection.score_threshold) {
            return Err(Error::ConfigError(
                "Score threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.nms_threshold) {
            return Err(Error::ConfigError(
                "NMS threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.detection.max_faces == 0 {
            return Err(Error::ConfigError("Maximum faces must be greater than 0".to_string()));
        }

        if let Some(path) = &self.face_model.path {
            if !path.exists() {
                return Err(Error::ConfigError(format!(
                    "3D face model not found: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Check that the native detection models exist
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] naming the first missing model.
    pub fn validate_detection_models(&self) -> Result<()> {
        for (name, path) in [
            ("Face detector", &self.detection.face_detector),
            ("Landmark", &self.detection.landmark_model),
        ] {
            if !path.exists() {
                return Err(Error::ConfigError(format!("{name} model not found: {}", path.display())));
            }
        }
        Ok(())
    }

    /// Camera model seeded with the configured intrinsics.
    ///
    /// A configured optical center counts as an explicit calibration.
    #[must_use]
    pub fn camera_model(&self) -> CameraModel {
        match (self.camera.focal_length, self.camera.optical_center) {
            (Some(f), Some([cx, cy])) => {
                let mut camera = CameraModel::new();
                camera.set_calibration(f, cx, cy);
                camera
            }
            (Some(f), None) => CameraModel::with_focal_length(f),
            (None, _) => CameraModel::new(),
        }
    }

    /// Load the configured reference model, or the built-in one
    ///
    /// # Errors
    ///
    /// Returns an error if a custom model cannot be loaded.
    pub fn face_model(&self) -> Result<FaceModel> {
        match &self.face_model.path {
            Some(path) => FaceModel::from_file(path),
            None => Ok(FaceModel::standard()),
        }
    }

    /// Solver tuning
    #[must_use]
    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            max_iterations: self.solver.max_iterations,
            convergence_epsilon: self.solver.convergence_epsilon,
            seed_acceptance_rms: self.solver.seed_acceptance_rms,
        }
    }

    /// Pose solver over the configured reference model
    ///
    /// # Errors
    ///
    /// Returns an error if a custom model cannot be loaded.
    pub fn pose_solver(&self) -> Result<PoseSolver> {
        Ok(PoseSolver::new(self.face_model()?, self.solver_options()))
    }

    /// Frame publisher
    #[must_use]
    pub fn frame_publisher(&self) -> FramePublisher {
        FramePublisher::new(self.publisher.prefix.clone())
            .with_future_dating(Duration::from_millis(self.publisher.future_dating_ms))
            .with_unit_scale(self.publisher.unit_scale)
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Head Pose Broadcaster Configuration

# Camera intrinsics (null = derive from the first frame)
camera:
  focal_length: 455.0
  optical_center: null
  frame_id: "camera"

# 3D reference model (null = built-in anthropometric model)
face_model:
  path: null

# Pose solver
solver:
  max_iterations: 50
  convergence_epsilon: 1.0e-10
  seed_from_previous_frame: false
  seed_acceptance_rms: 4.0

# Transform publishing
publisher:
  prefix: "face"
  future_dating_ms: 0
  unit_scale: 0.001

# Face detection (requires the opencv feature)
detection:
  face_detector: "assets/face_detection_yunet.onnx"
  landmark_model: "assets/face_landmarks.onnx"
  score_threshold: 0.6
  nms_threshold: 0.3
  max_faces: 10
  bbox_expansion: 0.1
"#;
