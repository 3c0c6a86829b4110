//! Landmark Provider boundary: face detection plus 68-point landmark regression.
//!
//! The pose pipeline only depends on [`LandmarkProvider`]; concrete detectors
//! (the ONNX backend, fixture replay, test mocks) are interchangeable.

pub mod fixture;
#[cfg(feature = "opencv")]
pub mod onnx;

pub use fixture::{Fixture, FixtureFace, FixtureFrame, FixtureProvider};
#[cfg(feature = "opencv")]
pub use onnx::OnnxLandmarkProvider;

use crate::Result;
use nalgebra::Point2;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

/// Axis-aligned face region in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl BoundingBox {
    /// Create a bounding box from its top-left corner and size
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest box containing every point, or `None` for an empty slice
    #[must_use]
    pub fn enclosing(points: &[Point2<f32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Area in square pixels
    #[must_use]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Right edge
    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge
    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// One detected face: region, confidence and raw landmark output
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    /// Bounding box of the detected face
    pub bbox: BoundingBox,
    /// Confidence score of the detection
    pub score: f32,
    /// Landmark points in frame pixels; 68 in the anatomical order when the
    /// provider honours its contract
    pub landmarks: Vec<Point2<f32>>,
}

/// Face detection and landmark regression capability.
///
/// Images are 8-bit BGR arrays shaped `(height, width, 3)`. Detections are
/// returned in the provider's order, which defines the face indices of the
/// frame.
pub trait LandmarkProvider {
    /// Detect faces and their landmarks in one frame
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying detector fails on this frame.
    fn detect(&mut self, image: ArrayView3<'_, u8>) -> Result<Vec<FaceDetection>>;
}

impl<P: LandmarkProvider + ?Sized> LandmarkProvider for Box<P> {
    fn detect(&mut self, image: ArrayView3<'_, u8>) -> Result<Vec<FaceDetection>> {
        (**self).detect(image)
    }
}
