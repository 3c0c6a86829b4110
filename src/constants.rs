//! Constants used throughout the pipeline

/// Number of landmarks returned by the provider for one face
pub const NUM_FACIAL_LANDMARKS: usize = 68;

/// Number of points in an extended landmark set (raw landmarks + mouth center)
pub const NUM_EXTENDED_LANDMARKS: usize = 69;

/// Anatomical landmark indices of the 68-point convention
pub mod landmark {
    /// Jawline start, below the subject's right ear
    pub const RIGHT_SIDE: usize = 0;
    /// Bottom of the chin
    pub const MENTON: usize = 8;
    /// Jawline end, below the subject's left ear
    pub const LEFT_SIDE: usize = 16;
    /// Inner end of the right eyebrow
    pub const EYEBROW_RIGHT: usize = 21;
    /// Inner end of the left eyebrow
    pub const EYEBROW_LEFT: usize = 22;
    /// Deepest point of the nasal bridge
    pub const SELLION: usize = 27;
    /// Nose tip
    pub const NOSE: usize = 30;
    /// Outer corner of the right eye
    pub const RIGHT_EYE: usize = 36;
    /// Outer corner of the left eye
    pub const LEFT_EYE: usize = 45;
    /// Right mouth corner
    pub const MOUTH_RIGHT: usize = 48;
    /// Top of the upper lip
    pub const MOUTH_UP: usize = 51;
    /// Left mouth corner
    pub const MOUTH_LEFT: usize = 54;
    /// Bottom of the lower lip
    pub const MOUTH_DOWN: usize = 57;
    /// Center of the inner upper lip
    pub const MOUTH_CENTER_TOP: usize = 62;
    /// Center of the inner lower lip
    pub const MOUTH_CENTER_BOTTOM: usize = 66;
    /// Synthesized mouth center, appended after the raw landmarks
    pub const STOMION: usize = 68;
}

/// Focal length (pixels) used before any calibration is known
pub const DEFAULT_FOCAL_LENGTH: f64 = 455.0;

/// Optical center is placed at image size divided by this factor
pub const CAMERA_CENTER_FACTOR: f64 = 2.0;

/// Minimum number of correspondences the PnP solver accepts
pub const MIN_PNP_CORRESPONDENCES: usize = 4;

/// Default maximum Levenberg-Marquardt iterations
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Default convergence threshold on the parameter update norm
pub const DEFAULT_CONVERGENCE_EPSILON: f64 = 1e-10;

/// A seeded solve above this RMS reprojection error (pixels) falls back to a cold start
pub const DEFAULT_SEED_ACCEPTANCE_RMS: f64 = 4.0;

/// Default prefix of published per-face frame names
pub const DEFAULT_FRAME_PREFIX: &str = "face";

/// Default camera reference frame name
pub const DEFAULT_CAMERA_FRAME: &str = "camera";

/// Scale from reference model units (millimetres) to published units (metres)
pub const DEFAULT_UNIT_SCALE: f64 = 0.001;

/// Decimal digits of landmark and position values in text reports
pub const REPORT_POSITION_PRECISION: usize = 4;

/// Decimal digits of angles in text reports
pub const REPORT_ANGLE_PRECISION: usize = 1;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
