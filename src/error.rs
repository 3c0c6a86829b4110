//! Error types for the head pose pipeline.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// `OpenCV` operation failed
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime inference failed
    #[cfg(feature = "opencv")]
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding failed
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// YAML (de)serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The landmark provider returned a detection that breaks its output contract
    #[error("Landmark provider returned {actual} points, expected {expected}")]
    LandmarkCount {
        /// Number of points the contract requires
        expected: usize,
        /// Number of points actually returned
        actual: usize,
    },

    /// Not enough 2-D/3-D correspondences to solve for a pose
    #[error("Insufficient correspondences for PnP: found {found}, need at least {required}")]
    InsufficientCorrespondences {
        /// Usable correspondences
        found: usize,
        /// Minimum required
        required: usize,
    },

    /// Camera intrinsics cannot be used for pose solving
    #[error("Invalid camera calibration: {0}")]
    InvalidCalibration(String),

    /// Pose solver could not produce a usable pose
    #[error("Pose solver failed: {0}")]
    SolverFailed(String),

    /// Landmark model loading or inference error
    #[error("Model error: {0}")]
    ModelError(String),

    /// 3-D reference model validation error (wrong indices, degenerate geometry, ...)
    #[error("Model validation error: {0}")]
    ModelValidationError(String),

    /// A frame source (camera, video, image, fixture) could not be opened
    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// Transform publishing failed
    #[error("Publish error: {0}")]
    PublishError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
