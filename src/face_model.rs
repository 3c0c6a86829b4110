//! Fixed anthropometric 3-D face model paired with landmark indices.
//!
//! Coordinates are millimetres in a head frame with +x pointing forward out
//! of the face, +y toward the subject's left and +z up. The origin is the
//! sellion.

use crate::{
    constants::{
        landmark::{LEFT_EYE, LEFT_SIDE, MENTON, NOSE, RIGHT_EYE, RIGHT_SIDE, SELLION, STOMION},
        MIN_PNP_CORRESPONDENCES, NUM_EXTENDED_LANDMARKS,
    },
    Error, Result,
};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use std::fs;
use std::path::Path;

/// Right ear, mapped to the first jawline landmark
pub const P3D_RIGHT_SIDE: [f64; 3] = [-100.0, -77.5, -6.0];
/// Chin
pub const P3D_MENTON: [f64; 3] = [0.0, 0.0, -133.0];
/// Left ear, mapped to the last jawline landmark
pub const P3D_LEFT_SIDE: [f64; 3] = [-100.0, 77.5, -6.0];
/// Nasal bridge
pub const P3D_SELLION: [f64; 3] = [0.0, 0.0, 0.0];
/// Nose tip
pub const P3D_NOSE: [f64; 3] = [21.0, 0.0, -48.0];
/// Right eye outer corner
pub const P3D_RIGHT_EYE: [f64; 3] = [-20.0, -65.5, -5.0];
/// Left eye outer corner
pub const P3D_LEFT_EYE: [f64; 3] = [-20.0, 65.5, -5.0];
/// Mouth center
pub const P3D_STOMION: [f64; 3] = [10.0, 0.0, -75.0];

const STANDARD_MODEL: [(usize, [f64; 3]); 8] = [
    (RIGHT_SIDE, P3D_RIGHT_SIDE),
    (MENTON, P3D_MENTON),
    (LEFT_SIDE, P3D_LEFT_SIDE),
    (SELLION, P3D_SELLION),
    (NOSE, P3D_NOSE),
    (RIGHT_EYE, P3D_RIGHT_EYE),
    (LEFT_EYE, P3D_LEFT_EYE),
    (STOMION, P3D_STOMION),
];

/// One landmark index paired with its 3-D reference position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    /// Index into the 69-point landmark set
    pub landmark: usize,
    /// Position in the head frame
    pub position: Point3<f64>,
}

/// Immutable lookup table from landmark index to 3-D head-frame point.
///
/// Points are kept sorted by landmark index so correspondences are always
/// built in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceModel {
    points: Vec<ReferencePoint>,
}

impl FaceModel {
    /// The built-in eight-point anthropometric model
    #[must_use]
    pub fn standard() -> Self {
        let points = STANDARD_MODEL
            .iter()
            .map(|&(landmark, [x, y, z])| ReferencePoint {
                landmark,
                position: Point3::new(x, y, z),
            })
            .collect();
        Self { points }
    }

    /// Build a model from arbitrary reference points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelValidationError`] if there are fewer than four
    /// points, a landmark index is out of range or repeated, a coordinate is
    /// not finite, or the points are collinear.
    pub fn new(mut points: Vec<ReferencePoint>) -> Result<Self> {
        if points.len() < MIN_PNP_CORRESPONDENCES {
            return Err(Error::ModelValidationError(format!(
                "Expected at least {} reference points, got {}",
                MIN_PNP_CORRESPONDENCES,
                points.len()
            )));
        }

        points.sort_by_key(|p| p.landmark);

        for pair in points.windows(2) {
            if pair[0].landmark == pair[1].landmark {
                return Err(Error::ModelValidationError(format!(
                    "Landmark index {} appears more than once",
                    pair[0].landmark
                )));
            }
        }

        for point in &points {
            if point.landmark >= NUM_EXTENDED_LANDMARKS {
                return Err(Error::ModelValidationError(format!(
                    "Landmark index {} out of range (0..{})",
                    point.landmark, NUM_EXTENDED_LANDMARKS
                )));
            }
            if !point.position.coords.iter().all(|v| v.is_finite()) {
                return Err(Error::ModelValidationError(format!(
                    "Non-finite coordinate for landmark {}",
                    point.landmark
                )));
            }
        }

        if Self::is_collinear(&points) {
            return Err(Error::ModelValidationError(
                "Reference points are collinear".to_string(),
            ));
        }

        Ok(Self { points })
    }

    /// Load a model from a text file, one `index x y z` entry per line
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails [`Self::parse`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Loading 3D face model from {}", path.as_ref().display());
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a model from text.
    ///
    /// Blank lines and lines starting with `#` are skipped; every other line
    /// must hold a landmark index followed by three coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelValidationError`] for malformed lines or an
    /// invalid point set.
    pub fn parse(content: &str) -> Result<Self> {
        let mut points = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(Error::ModelValidationError(format!(
                    "Line {}: expected 'index x y z', got {} fields",
                    line_no + 1,
                    fields.len()
                )));
            }

            let landmark = fields[0].parse::<usize>().map_err(|e| {
                Error::ModelValidationError(format!("Line {}: bad landmark index: {e}", line_no + 1))
            })?;
            let mut coords = [0.0; 3];
            for (value, field) in coords.iter_mut().zip(&fields[1..]) {
                *value = field.parse::<f64>().map_err(|e| {
                    Error::ModelValidationError(format!("Line {}: bad coordinate: {e}", line_no + 1))
                })?;
            }

            points.push(ReferencePoint {
                landmark,
                position: Point3::new(coords[0], coords[1], coords[2]),
            });
        }

        Self::new(points)
    }

    /// Reference points in landmark index order
    #[must_use]
    pub fn points(&self) -> &[ReferencePoint] {
        &self.points
    }

    /// Number of reference points
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the model is empty (never true for a validated model)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Reference position for a landmark index
    #[must_use]
    pub fn position_of(&self, landmark: usize) -> Option<Point3<f64>> {
        self.points
            .binary_search_by_key(&landmark, |p| p.landmark)
            .ok()
            .map(|i| self.points[i].position)
    }

    /// Rotation taking head-frame axes to camera axes for a face looking
    /// straight into the camera, upright.
    ///
    /// Head +x (forward) maps to camera -z, head +y (subject's left) to
    /// camera +x and head +z (up) to camera -y.
    #[must_use]
    pub fn frontal_rotation() -> Rotation3<f64> {
        Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
        ]))
    }

    fn is_collinear(points: &[ReferencePoint]) -> bool {
        let n = points.len() as f64;
        let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.position.coords) / n;

        let mut scatter = Matrix3::zeros();
        for p in points {
            let d = p.position.coords - centroid;
            scatter += d * d.transpose();
        }

        let mut eigenvalues: Vec<f64> = scatter.symmetric_eigenvalues().iter().map(|v| v.abs()).collect();
        eigenvalues.sort_by(f64::total_cmp);
        let largest = eigenvalues[2];
        largest <= f64::EPSILON || eigenvalues[1] <= largest * 1e-12
    }
}

impl Default for FaceModel {
    fn default() -> Self {
        Self::standard()
    }
}
