//! Camera model: focal length and optical center used for pose solving.

use crate::constants::CAMERA_CENTER_FACTOR;
use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Immutable per-frame snapshot of the pinhole intrinsics.
///
/// Zero lens distortion is assumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Focal length in pixels (same for both axes)
    pub focal_length: f64,
    /// Optical center x in pixels
    pub cx: f64,
    /// Optical center y in pixels
    pub cy: f64,
}

impl Intrinsics {
    /// Create intrinsics from a focal length and optical center
    #[must_use]
    pub fn new(focal_length: f64, cx: f64, cy: f64) -> Self {
        Self { focal_length, cx, cy }
    }

    /// Whether these intrinsics can be used for pose solving.
    ///
    /// A zero focal length is the uncalibrated sentinel.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.focal_length.is_finite() && self.focal_length > 0.0 && self.cx.is_finite() && self.cy.is_finite()
    }

    /// Camera matrix `[[f, 0, cx], [0, f, cy], [0, 0, 1]]`
    #[must_use]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal_length, 0.0, self.cx,
            0.0, self.focal_length, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Project a point given in camera coordinates to pixels.
    ///
    /// Returns `None` for points on or behind the image plane.
    #[must_use]
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= f64::EPSILON {
            return None;
        }
        Some(Point2::new(
            self.focal_length * point.x / point.z + self.cx,
            self.focal_length * point.y / point.z + self.cy,
        ))
    }

    /// Normalized image coordinates of a pixel (`K^-1 [u, v, 1]`, dropping the 1)
    #[must_use]
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        Point2::new(
            (pixel.x - self.cx) / self.focal_length,
            (pixel.y - self.cy) / self.focal_length,
        )
    }
}

/// Calibration message from an authoritative source (camera-info feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Name of the camera's reference frame
    pub frame_id: String,
    /// Row-major 3x3 intrinsic matrix; `k[0] == 0` means uncalibrated
    pub k: [f64; 9],
}

impl CameraInfo {
    /// Build a camera-info message from a focal length and optical center
    #[must_use]
    pub fn from_intrinsics(frame_id: impl Into<String>, focal_length: f64, cx: f64, cy: f64) -> Self {
        Self {
            frame_id: frame_id.into(),
            k: [focal_length, 0.0, cx, 0.0, focal_length, cy, 0.0, 0.0, 1.0],
        }
    }

    /// Horizontal focal length
    #[must_use]
    pub fn fx(&self) -> f64 {
        self.k[0]
    }

    /// Optical center x
    #[must_use]
    pub fn cx(&self) -> f64 {
        self.k[2]
    }

    /// Optical center y
    #[must_use]
    pub fn cy(&self) -> f64 {
        self.k[5]
    }

    /// Whether the message carries the uncalibrated sentinel
    #[must_use]
    pub fn is_uncalibrated(&self) -> bool {
        self.k[0] == 0.0
    }
}

/// Focal length and optical center shared by every frame.
///
/// Unset values are bootstrapped from the first frame's size; an explicit
/// calibration always overwrites them and is never replaced by the heuristic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraModel {
    focal_length: Option<f64>,
    optical_center: Option<Point2<f64>>,
    calibrated: bool,
}

impl CameraModel {
    /// Camera model with nothing known yet; the focal length defaults to the image width
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera model with a known focal length and an unset optical center
    #[must_use]
    pub fn with_focal_length(focal_length: f64) -> Self {
        Self {
            focal_length: Some(focal_length),
            ..Self::default()
        }
    }

    /// Bootstrap unset intrinsics from the image size.
    ///
    /// The optical center becomes `(width / 2, height / 2)`; a missing focal
    /// length becomes the image width. Values already set are left untouched.
    pub fn ensure_initialized(&mut self, image_width: usize, image_height: usize) {
        #[allow(clippy::cast_precision_loss)] // Image dimensions are far below 2^52
        let (width, height) = (image_width as f64, image_height as f64);

        if self.optical_center.is_none() {
            let center = Point2::new(width / CAMERA_CENTER_FACTOR, height / CAMERA_CENTER_FACTOR);
            log::info!("Setting the optical center to ({}, {})", center.x, center.y);
            self.optical_center = Some(center);
        }
        if self.focal_length.is_none() {
            log::info!("No focal length configured, assuming {width} px");
            self.focal_length = Some(width);
        }
    }

    /// Overwrite the intrinsics with an authoritative calibration.
    ///
    /// A zero focal length is stored as-is and makes [`Self::snapshot`]
    /// return `None` until a valid calibration arrives.
    pub fn set_calibration(&mut self, focal_length: f64, cx: f64, cy: f64) {
        self.focal_length = Some(focal_length);
        self.optical_center = Some(Point2::new(cx, cy));
        self.calibrated = true;
    }

    /// Apply a camera-info message
    pub fn apply_camera_info(&mut self, info: &CameraInfo) {
        self.set_calibration(info.fx(), info.cx(), info.cy());
    }

    /// Whether an explicit calibration has ever been applied
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Current focal length, if known
    #[must_use]
    pub fn focal_length(&self) -> Option<f64> {
        self.focal_length
    }

    /// Current optical center, if known
    #[must_use]
    pub fn optical_center(&self) -> Option<Point2<f64>> {
        self.optical_center
    }

    /// Intrinsics to use for the current frame, or `None` if they are unknown or invalid
    #[must_use]
    pub fn snapshot(&self) -> Option<Intrinsics> {
        let focal_length = self.focal_length?;
        let center = self.optical_center?;
        let intrinsics = Intrinsics::new(focal_length, center.x, center.y);
        intrinsics.is_valid().then_some(intrinsics)
    }
}
