//! Image conversion between decoded images, `ndarray` frames and (with the
//! `opencv` feature) OpenCV `Mat`s.
//!
//! Frames are `Array3<u8>` shaped `(height, width, 3)` in BGR channel order.

use crate::{Error, Result};
use image::RgbImage;
use ndarray::{Array3, ArrayView3};
use std::path::Path;

/// Whether a frame has no pixels
#[must_use]
pub fn is_zero_area(image: &ArrayView3<'_, u8>) -> bool {
    let (height, width, _) = image.dim();
    height == 0 || width == 0
}

/// Convert a decoded RGB image to a BGR frame
#[must_use]
pub fn rgb_image_to_bgr(image: &RgbImage) -> Array3<u8> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    Array3::from_shape_fn((height, width, 3), |(row, col, ch)| {
        #[allow(clippy::cast_possible_truncation)] // Bounded by the image dimensions
        let pixel = image.get_pixel(col as u32, row as u32);
        pixel[2 - ch]
    })
}

/// Decode an image file (PNG, JPEG or BMP) into a BGR frame
///
/// # Errors
///
/// Returns an error if the file cannot be opened or decoded.
pub fn load_bgr_image<P: AsRef<Path>>(path: P) -> Result<Array3<u8>> {
    log::debug!("Decoding image {}", path.as_ref().display());
    let decoded = image::open(path)?;
    Ok(rgb_image_to_bgr(&decoded.to_rgb8()))
}

/// Check that a frame is shaped `(height, width, 3)`
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for any other channel count.
pub fn ensure_bgr(image: &ArrayView3<'_, u8>) -> Result<()> {
    let (_, _, channels) = image.dim();
    if channels == 3 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Expected 3 colour channels, got {channels}")))
    }
}

#[cfg(feature = "opencv")]
pub use mat::{array_to_mat, mat_to_array};

#[cfg(feature = "opencv")]
mod mat {
    use crate::{Error, Result};
    use ndarray::{Array3, ArrayView3};
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use opencv::prelude::*;

    /// Convert an 8-bit, 3-channel `Mat` to a BGR frame
    ///
    /// # Errors
    ///
    /// Returns an error if the `Mat` is not 8-bit 3-channel or its data cannot be read.
    #[allow(clippy::cast_sign_loss)] // OpenCV dimensions are non-negative
    pub fn mat_to_array(mat: &Mat) -> Result<Array3<u8>> {
        if mat.typ() != CV_8UC3 {
            return Err(Error::InvalidInput(format!("Expected an 8-bit BGR Mat, got type {}", mat.typ())));
        }
        let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
        let copy = if mat.is_continuous() { None } else { Some(mat.try_clone()?) };
        let source = copy.as_ref().unwrap_or(mat);

        Array3::from_shape_vec((rows, cols, 3), source.data_bytes()?.to_vec())
            .map_err(|e| Error::InvalidInput(format!("Failed to create array from Mat: {e}")))
    }

    /// Convert a BGR frame to an 8-bit, 3-channel `Mat`
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large for OpenCV or `Mat` creation fails.
    pub fn array_to_mat(image: &ArrayView3<'_, u8>) -> Result<Mat> {
        super::ensure_bgr(image)?;
        let (height, width, _) = image.dim();
        let rows = i32::try_from(height).map_err(|_| Error::InvalidInput(format!("Height {height} too large")))?;
        let cols = i32::try_from(width).map_err(|_| Error::InvalidInput(format!("Width {width} too large")))?;

        let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::default())?;
        let dst = mat.data_bytes_mut()?;
        for (d, s) in dst.iter_mut().zip(image.iter()) {
            *d = *s;
        }
        Ok(mat)
    }
}
