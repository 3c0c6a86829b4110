//! Text reports of a frame's results.
//!
//! A report is a single-line JSON object keyed by `face_<i>`, where `i` is the
//! face's detection index. Values use fixed precision: landmark coordinates
//! and positions with four decimals, angles with one.

use crate::{
    constants::{REPORT_ANGLE_PRECISION, REPORT_POSITION_PRECISION},
    landmarks::FaceLandmarks,
    pose_estimation::FacePose,
};
use std::fmt::Write;

/// Human-readable summary of one solved pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSummary {
    /// Degrees
    pub yaw: f64,
    /// Degrees
    pub pitch: f64,
    /// Degrees
    pub roll: f64,
    /// Reference model units
    pub x: f64,
    /// Reference model units
    pub y: f64,
    /// Reference model units
    pub z: f64,
}

impl From<&FacePose> for PoseSummary {
    fn from(face: &FacePose) -> Self {
        let angles = face.pose.angles();
        let t = face.pose.translation;
        Self {
            yaw: angles.yaw,
            pitch: angles.pitch,
            roll: angles.roll,
            x: t.x,
            y: t.y,
            z: t.z,
        }
    }
}

fn number(value: f64, precision: usize) -> String {
    if value.is_finite() {
        format!("{value:.precision$}")
    } else {
        "null".to_string()
    }
}

fn object<I>(entries: I) -> String
where
    I: IntoIterator<Item = (usize, String)>,
{
    let body: Vec<String> = entries
        .into_iter()
        .map(|(face_index, value)| format!("\"face_{face_index}\": {value}"))
        .collect();
    format!("{{{}}}", body.join(", "))
}

/// Landmark report: each face maps to its 69 `[x, y]` pairs
#[must_use]
pub fn landmark_report(faces: &[FaceLandmarks]) -> String {
    object(faces.iter().map(|face| {
        let mut pairs = String::from("[");
        for (i, p) in face.landmarks.points().iter().enumerate() {
            if i > 0 {
                pairs.push_str(", ");
            }
            // Writing to a String cannot fail
            let _ = write!(
                pairs,
                "[{}, {}]",
                number(p.x, REPORT_POSITION_PRECISION),
                number(p.y, REPORT_POSITION_PRECISION)
            );
        }
        pairs.push(']');
        (face.face_index, pairs)
    }))
}

/// Pose report: each face maps to `{yaw, pitch, roll, x, y, z}`
#[must_use]
pub fn pose_report(poses: &[FacePose]) -> String {
    object(poses.iter().map(|face| {
        let s = PoseSummary::from(face);
        let value = format!(
            "{{\"yaw\": {}, \"pitch\": {}, \"roll\": {}, \"x\": {}, \"y\": {}, \"z\": {}}}",
            number(s.yaw, REPORT_ANGLE_PRECISION),
            number(s.pitch, REPORT_ANGLE_PRECISION),
            number(s.roll, REPORT_ANGLE_PRECISION),
            number(s.x, REPORT_POSITION_PRECISION),
            number(s.y, REPORT_POSITION_PRECISION),
            number(s.z, REPORT_POSITION_PRECISION),
        );
        (face.face_index, value)
    }))
}
