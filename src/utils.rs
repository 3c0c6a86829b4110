//! Utility functions for image handling and face region geometry.

pub mod image_conversion;

use crate::provider::BoundingBox;

/// Expand face boxes by `shift` of their size on every side, make them
/// square and keep them inside a `max_width` x `max_height` image.
///
/// Landmark regressors expect a square crop with some margin around the face.
pub fn refine_boxes(boxes: &mut [BoundingBox], max_width: f32, max_height: f32, shift: f32) {
    for bbox in boxes.iter_mut() {
        let x_shift = (bbox.width * shift).clamp(0.0, max_width);
        let y_shift = (bbox.height * shift).clamp(0.0, max_height);

        bbox.x = (bbox.x - x_shift).max(0.0);
        bbox.y = (bbox.y - y_shift).max(0.0);
        bbox.width = (bbox.width + 2.0 * x_shift).min(max_width - bbox.x);
        bbox.height = (bbox.height + 2.0 * y_shift).min(max_height - bbox.y);

        let side_length = bbox.width.max(bbox.height).min(max_width.min(max_height));
        bbox.width = side_length;
        bbox.height = side_length;

        if bbox.right() > max_width {
            bbox.x = max_width - bbox.width;
        }
        if bbox.bottom() > max_height {
            bbox.y = max_height - bbox.height;
        }
    }
}
