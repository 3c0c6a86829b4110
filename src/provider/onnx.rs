//! Native landmark provider: OpenCV YuNet face detection followed by a
//! 68-point landmark regressor run with ONNX Runtime.

use super::{BoundingBox, FaceDetection, LandmarkProvider};
use crate::{
    constants::NUM_FACIAL_LANDMARKS,
    utils::{image_conversion::array_to_mat, refine_boxes},
    Error, Result,
};
use nalgebra::Point2;
use ndarray::{Array1, Array4, ArrayView3, CowArray};
use opencv::core::{Mat, Ptr, Rect, Size, Vec3f, CV_32F};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::objdetect::FaceDetectorYN;
use opencv::prelude::*;
use ort::{Environment, GraphOptimizationLevel, LoggingLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// Landmark model input resolution
const LANDMARK_INPUT_SIZE: i32 = 128;

/// Column of the confidence score in a YuNet detection row
const YUNET_SCORE_COLUMN: i32 = 14;

/// Tunables of the native provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnnxProviderOptions {
    /// Minimum face detection confidence
    pub score_threshold: f32,
    /// IOU threshold for non-maximum suppression
    pub nms_threshold: f32,
    /// Maximum number of faces per frame
    pub max_faces: usize,
    /// Fraction of the face box added on every side before landmark regression
    pub bbox_expansion: f32,
}

/// Face detector plus landmark regressor
pub struct OnnxLandmarkProvider {
    detector: Ptr<FaceDetectorYN>,
    session: Session,
    options: OnnxProviderOptions,
}

impl OnnxLandmarkProvider {
    /// Load the face detector and landmark models
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Either model file cannot be loaded
    /// - The ONNX runtime environment cannot be created
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        face_detector_model: P,
        landmark_model: Q,
        options: OnnxProviderOptions,
    ) -> Result<Self> {
        let detector_path = face_detector_model.as_ref();
        log::info!("Loading face detector {}", detector_path.display());
        let detector = FaceDetectorYN::create(
            &detector_path.to_string_lossy(),
            "",
            Size::new(320, 320),
            options.score_threshold,
            options.nms_threshold,
            i32::try_from(options.max_faces).unwrap_or(i32::MAX),
            0,
            0,
        )?;

        log::info!("Loading landmark model {}", landmark_model.as_ref().display());
        let environment = Arc::new(
            Environment::builder()
                .with_name("landmark_provider")
                .with_log_level(LoggingLevel::Warning)
                .build()?,
        );
        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(landmark_model)?;
        if session.inputs.is_empty() || session.outputs.is_empty() {
            return Err(Error::ModelError("Landmark model has no inputs or outputs".to_string()));
        }

        Ok(Self {
            detector,
            session,
            options,
        })
    }

    fn detect_faces(&mut self, frame: &Mat) -> Result<Vec<(BoundingBox, f32)>> {
        self.detector.set_input_size(frame.size()?)?;
        let mut faces = Mat::default();
        self.detector.detect(frame, &mut faces)?;

        let mut detections = Vec::with_capacity(faces.rows().max(0) as usize);
        for row in 0..faces.rows() {
            let x = *faces.at_2d::<f32>(row, 0)?;
            let y = *faces.at_2d::<f32>(row, 1)?;
            let w = *faces.at_2d::<f32>(row, 2)?;
            let h = *faces.at_2d::<f32>(row, 3)?;
            let score = *faces.at_2d::<f32>(row, YUNET_SCORE_COLUMN)?;
            detections.push((BoundingBox::new(x, y, w, h), score));
        }
        detections.truncate(self.options.max_faces);
        Ok(detections)
    }

    /// Resize, convert to RGB in `[0, 1]` and stack crops as NHWC
    #[allow(clippy::cast_sign_loss)] // Input size is a positive constant
    fn preprocess_batch(crops: &[Mat]) -> Result<Array4<f32>> {
        let size = LANDMARK_INPUT_SIZE as usize;
        let mut batch = Array4::<f32>::zeros((crops.len(), size, size, 3));

        for (idx, crop) in crops.iter().enumerate() {
            let mut resized = Mat::default();
            imgproc::resize(
                crop,
                &mut resized,
                Size::new(LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE),
                0.0,
                0.0,
                InterpolationFlags::INTER_LINEAR as i32,
            )?;

            let mut rgb = Mat::default();
            imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let mut float_image = Mat::default();
            rgb.convert_to(&mut float_image, CV_32F, 1.0 / 255.0, 0.0)?;

            for row in 0..LANDMARK_INPUT_SIZE {
                for col in 0..LANDMARK_INPUT_SIZE {
                    let pixel = float_image.at_2d::<Vec3f>(row, col)?;
                    for ch in 0..3 {
                        batch[[idx, row as usize, col as usize, ch]] = pixel[ch];
                    }
                }
            }
        }
        Ok(batch)
    }

    fn forward(&self, inputs: Array4<f32>) -> Result<Array1<f32>> {
        let cow_array = CowArray::from(inputs.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let marks_output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| Error::ModelError("No output from landmark model".to_string()))?;
        let marks_tensor = marks_output.try_extract::<f32>()?;
        let marks_view = marks_tensor.view();
        let marks = marks_view
            .as_slice()
            .ok_or_else(|| Error::ModelError("Landmark output is not contiguous".to_string()))?;
        Ok(Array1::from(marks.to_vec()))
    }
}

/// Map normalized model output back to frame pixels for each crop.
///
/// A crop whose output is short yields fewer than 68 points and is rejected
/// downstream as a contract violation.
fn postprocess(marks: &Array1<f32>, rois: &[BoundingBox]) -> Vec<Vec<Point2<f32>>> {
    #[allow(clippy::cast_precision_loss)] // Small constant
    let input_size = LANDMARK_INPUT_SIZE as f32;
    let stride = NUM_FACIAL_LANDMARKS * 2;

    rois.iter()
        .enumerate()
        .map(|(i, roi)| {
            (0..NUM_FACIAL_LANDMARKS)
                .map(|j| i * stride + j * 2)
                .take_while(|&idx| idx + 1 < marks.len())
                .map(|idx| {
                    Point2::new(
                        roi.x + marks[idx] * roi.width / input_size,
                        roi.y + marks[idx + 1] * roi.height / input_size,
                    )
                })
                .collect()
        })
        .collect()
}

impl LandmarkProvider for OnnxLandmarkProvider {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)] // Pixel coordinates
    fn detect(&mut self, image: ArrayView3<'_, u8>) -> Result<Vec<FaceDetection>> {
        let frame = array_to_mat(&image)?;
        let faces = self.detect_faces(&frame)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let mut rois: Vec<BoundingBox> = faces.iter().map(|(bbox, _)| *bbox).collect();
        refine_boxes(
            &mut rois,
            frame.cols() as f32,
            frame.rows() as f32,
            self.options.bbox_expansion,
        );

        let mut crops = Vec::with_capacity(rois.len());
        for roi in &rois {
            let rect = Rect::new(
                roi.x.floor() as i32,
                roi.y.floor() as i32,
                (roi.width.floor() as i32).max(1),
                (roi.height.floor() as i32).max(1),
            );
            crops.push(Mat::roi(&frame, rect)?.try_clone()?);
        }

        let marks = self.forward(Self::preprocess_batch(&crops)?)?;
        let landmarks = postprocess(&marks, &rois);

        Ok(faces
            .into_iter()
            .zip(landmarks)
            .map(|((bbox, score), landmarks)| FaceDetection {
                bbox,
                score,
                landmarks,
            })
            .collect())
    }
}
