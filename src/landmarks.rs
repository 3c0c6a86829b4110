//! Landmark extraction: raw 68-point provider output to a 69-point landmark set.

use crate::{
    constants::{
        landmark::{MOUTH_CENTER_BOTTOM, MOUTH_CENTER_TOP, STOMION},
        NUM_EXTENDED_LANDMARKS, NUM_FACIAL_LANDMARKS,
    },
    Error, Result,
};
use nalgebra::Point2;
use std::ops::Index;

/// Ordered landmark points of one face in one frame, in image pixels.
///
/// Indices 0-67 follow the 68-point anatomical convention; index 68 is the
/// synthesized mouth center (stomion).
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point2<f64>>,
}

impl LandmarkSet {
    /// All points in index order
    #[must_use]
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    /// Point at `index`, if present
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Point2<f64>> {
        self.points.get(index)
    }

    /// Number of points (always 69 for extracted sets)
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set holds no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The synthesized mouth center
    #[must_use]
    pub fn mouth_center(&self) -> Point2<f64> {
        self.points[STOMION]
    }
}

impl Index<usize> for LandmarkSet {
    type Output = Point2<f64>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

/// Landmarks of one detected face, tagged with its detection index in the frame
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    /// Index of the face in the provider's detection order
    pub face_index: usize,
    /// Extended 69-point set
    pub landmarks: LandmarkSet,
}

/// Build a 69-point landmark set from raw provider output.
///
/// The first 68 points are copied unchanged and the mouth center, the mean of
/// the inner upper and inner lower lip landmarks, is appended at index 68.
///
/// # Errors
///
/// Returns [`Error::LandmarkCount`] if `raw` does not hold exactly 68 points.
pub fn extract_landmarks(raw: &[Point2<f64>]) -> Result<LandmarkSet> {
    if raw.len() != NUM_FACIAL_LANDMARKS {
        return Err(Error::LandmarkCount {
            expected: NUM_FACIAL_LANDMARKS,
            actual: raw.len(),
        });
    }

    let mut points = Vec::with_capacity(NUM_EXTENDED_LANDMARKS);
    points.extend_from_slice(raw);

    let top = raw[MOUTH_CENTER_TOP];
    let bottom = raw[MOUTH_CENTER_BOTTOM];
    points.push(nalgebra::center(&top, &bottom));

    Ok(LandmarkSet { points })
}
