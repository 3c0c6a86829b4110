//! Recorded landmark fixtures and a provider that replays them frame by frame.

use super::{BoundingBox, FaceDetection, LandmarkProvider};
use crate::{camera::CameraInfo, Error, Result};
use nalgebra::Point2;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

fn default_score() -> f32 {
    1.0
}

/// One recorded face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureFace {
    /// Face region; derived from the landmarks when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Detection confidence
    #[serde(default = "default_score")]
    pub score: f32,
    /// Raw landmark points as `[x, y]` pairs
    pub landmarks: Vec<[f32; 2]>,
}

impl FixtureFace {
    /// Convert to a provider detection
    #[must_use]
    pub fn to_detection(&self) -> FaceDetection {
        let landmarks: Vec<Point2<f32>> = self.landmarks.iter().map(|&[x, y]| Point2::new(x, y)).collect();
        let bbox = self
            .bbox
            .or_else(|| BoundingBox::enclosing(&landmarks))
            .unwrap_or_default();
        FaceDetection {
            bbox,
            score: self.score,
            landmarks,
        }
    }
}

/// One recorded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureFrame {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
    /// Acquisition time in seconds
    #[serde(default)]
    pub stamp: f64,
    /// Calibration received alongside this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_info: Option<CameraInfo>,
    /// Faces in detection order
    #[serde(default)]
    pub faces: Vec<FixtureFace>,
}

/// A recorded sequence of frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    /// Frames in acquisition order
    pub frames: Vec<FixtureFrame>,
}

impl Fixture {
    /// Load a fixture from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Loading landmark fixture from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a fixture from YAML text
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a frame has no pixels.
    pub fn parse(content: &str) -> Result<Self> {
        let fixture: Self = serde_yaml::from_str(content)?;
        if let Some(i) = fixture.frames.iter().position(|f| f.width == 0 || f.height == 0) {
            log::warn!("Fixture frame {i} has zero area and will be skipped");
        }
        Ok(fixture)
    }

    /// Save the fixture as YAML
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize fixture: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Provider returning pre-recorded detections, one frame per call.
///
/// Once every recorded frame has been consumed it reports no faces.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    frames: VecDeque<Vec<FaceDetection>>,
}

impl FixtureProvider {
    /// Provider replaying the given per-frame detections
    #[must_use]
    pub fn new(frames: Vec<Vec<FaceDetection>>) -> Self {
        Self { frames: frames.into() }
    }

    /// Provider replaying every frame of a fixture.
    ///
    /// Zero-area frames are left out, in step with the estimator, which never
    /// runs detection on them.
    #[must_use]
    pub fn from_fixture(fixture: &Fixture) -> Self {
        Self::new(
            fixture
                .frames
                .iter()
                .filter(|frame| frame.width > 0 && frame.height > 0)
                .map(|frame| frame.faces.iter().map(FixtureFace::to_detection).collect())
                .collect(),
        )
    }

    /// Queue detections for one more frame
    pub fn push_frame(&mut self, detections: Vec<FaceDetection>) {
        self.frames.push_back(detections);
    }

    /// Number of frames not yet replayed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl LandmarkProvider for FixtureProvider {
    fn detect(&mut self, _image: ArrayView3<'_, u8>) -> Result<Vec<FaceDetection>> {
        Ok(self.frames.pop_front().unwrap_or_else(|| {
            log::debug!("Fixture exhausted, reporting no faces");
            Vec::new()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    const FIXTURE: &str = r"
frames:
  - width: 640
    height: 480
    stamp: 1.5
    camera_info:
      frame_id: head_camera
      k: [600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0]
    faces:
      - score: 0.9
        landmarks: [[10.0, 20.0], [30.0, 40.0]]
      - bbox: { x: 1.0, y: 2.0, width: 3.0, height: 4.0 }
        landmarks: [[5.0, 5.0]]
  - width: 640
    height: 480
";

    #[test]
    fn test_parse_fixture() {
        let fixture = Fixture::parse(FIXTURE).unwrap();
        assert_eq!(fixture.frames.len(), 2);

        let first = &fixture.frames[0];
        assert_eq!(first.stamp, 1.5);
        assert_eq!(first.camera_info.as_ref().unwrap().fx(), 600.0);
        assert_eq!(first.faces.len(), 2);

        let derived = first.faces[0].to_detection();
        assert_eq!(derived.bbox, BoundingBox::new(10.0, 20.0, 20.0, 20.0));
        assert_eq!(derived.score, 0.9);

        let explicit = first.faces[1].to_detection();
        assert_eq!(explicit.bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(explicit.score, 1.0);

        assert!(fixture.frames[1].faces.is_empty());
        assert!(fixture.frames[1].camera_info.is_none());
    }

    #[test]
    fn test_provider_replays_in_order() {
        let fixture = Fixture::parse(FIXTURE).unwrap();
        let mut provider = FixtureProvider::from_fixture(&fixture);
        let image = Array3::<u8>::zeros((480, 640, 3));

        assert_eq!(provider.remaining(), 2);
        assert_eq!(provider.detect(image.view()).unwrap().len(), 2);
        assert_eq!(provider.detect(image.view()).unwrap().len(), 0);
        assert_eq!(provider.remaining(), 0);

        // Exhausted fixtures keep reporting no faces
        assert!(provider.detect(image.view()).unwrap().is_empty());
    }

    #[test]
    fn test_zero_area_frames_not_queued() {
        let fixture = Fixture::parse(
            r"
frames:
  - { width: 640, height: 480, faces: [] }
  - { width: 0, height: 0, faces: [ { landmarks: [[1.0, 1.0]] } ] }
  - { width: 640, height: 0 }
  - { width: 640, height: 480, faces: [ { landmarks: [[2.0, 2.0]] }, { landmarks: [[3.0, 3.0]] } ] }
",
        )
        .unwrap();
        let mut provider = FixtureProvider::from_fixture(&fixture);
        let image = Array3::<u8>::zeros((480, 640, 3));

        assert_eq!(provider.remaining(), 2);
        assert!(provider.detect(image.view()).unwrap().is_empty());
        assert_eq!(provider.detect(image.view()).unwrap().len(), 2);
    }

    #[test]
    fn test_fixture_file_round_trip() {
        let fixture = Fixture::parse(FIXTURE).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        fixture.to_file(file.path()).unwrap();

        let loaded = Fixture::from_file(file.path()).unwrap();
        assert_eq!(loaded, fixture);
    }

    #[test]
    fn test_malformed_fixture_rejected() {
        assert!(Fixture::parse("frames: [ { width: 10 } ]").is_err());
        assert!(Fixture::parse("not: [valid").is_err());
    }
}
