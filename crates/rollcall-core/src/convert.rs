//! Moving pixels between `image` buffers and OpenCV matrices.

use image::{GrayImage, RgbImage};
use opencv::core::{self, Mat, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

/// Luma of an RGB frame with OpenCV's BT.601 weights (0.299, 0.587, 0.114).
///
/// Training and recognition both go through here so crops fed to the model
/// always share one conversion.
pub fn grayscale(frame: &RgbImage) -> opencv::Result<GrayImage> {
    if frame.width() == 0 || frame.height() == 0 {
        return Ok(GrayImage::new(frame.width(), frame.height()));
    }
    let rgb = rgb_to_mat(frame)?;
    let mut gray = Mat::default();
    imgproc::cvt_color_def(&rgb, &mut gray, imgproc::COLOR_RGB2GRAY)?;
    mat_to_gray(&gray)
}

/// Single-channel 8-bit copy of `img`.
pub(crate) fn gray_to_mat(img: &GrayImage) -> opencv::Result<Mat> {
    filled_mat(img.height(), img.width(), core::CV_8UC1, img.as_raw())
}

fn rgb_to_mat(img: &RgbImage) -> opencv::Result<Mat> {
    filled_mat(img.height(), img.width(), core::CV_8UC3, img.as_raw())
}

fn filled_mat(rows: u32, cols: u32, typ: i32, data: &[u8]) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, typ, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(data);
    Ok(mat)
}

fn mat_to_gray(mat: &Mat) -> opencv::Result<GrayImage> {
    let (cols, rows) = (mat.cols() as u32, mat.rows() as u32);
    let data = mat.data_bytes()?.to_vec();
    GrayImage::from_raw(cols, rows, data).ok_or_else(|| {
        opencv::Error::new(
            core::StsUnmatchedSizes,
            format!("{cols}x{rows} matrix does not hold one byte per pixel"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_red_uses_bt601_weight() {
        let frame = RgbImage::from_pixel(4, 3, Rgb([255, 0, 0]));
        let gray = grayscale(&frame).unwrap();
        assert_eq!(gray.dimensions(), (4, 3));
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
    }

    #[test]
    fn test_primary_weights() {
        let mut frame = RgbImage::new(3, 1);
        frame.put_pixel(0, 0, Rgb([0, 255, 0]));
        frame.put_pixel(1, 0, Rgb([0, 0, 255]));
        frame.put_pixel(2, 0, Rgb([90, 90, 90]));
        let gray = grayscale(&frame).unwrap();
        assert_eq!(gray.get_pixel(0, 0)[0], 150);
        assert_eq!(gray.get_pixel(1, 0)[0], 29);
        // Neutral grey passes through unchanged.
        assert_eq!(gray.get_pixel(2, 0)[0], 90);
    }

    #[test]
    fn test_empty_frame() {
        let gray = grayscale(&RgbImage::new(0, 0)).unwrap();
        assert_eq!(gray.dimensions(), (0, 0));
    }

    #[test]
    fn test_gray_mat_layout() {
        let img = GrayImage::from_fn(5, 2, |x, y| image::Luma([(y * 5 + x) as u8]));
        let mat = gray_to_mat(&img).unwrap();
        assert_eq!((mat.cols(), mat.rows()), (5, 2));
        assert_eq!(*mat.at_2d::<u8>(1, 3).unwrap(), 8);
    }
}
