//! Synthetic images and detector doubles shared by unit tests.

use crate::detector::{CascadeError, FaceDetector};
use crate::types::FaceRegion;
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;

/// Square face stand-in: checkerboard with `cell`-pixel squares.
pub(crate) fn checkerboard_face(size: u32, cell: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Luma([40])
        } else {
            Luma([210])
        }
    })
}

/// Square face stand-in: horizontal ramp stripes with the given period.
pub(crate) fn stripes_face(size: u32, period: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |_, y| Luma([((y % period) * 255 / period) as u8]))
}

/// RGB frame with `face` pasted at each region.
pub(crate) fn frame_with(width: u32, height: u32, faces: &[(FaceRegion, &GrayImage)]) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    for (region, face) in faces {
        for y in 0..region.height.min(face.height()) {
            for x in 0..region.width.min(face.width()) {
                let v = face.get_pixel(x, y)[0];
                frame.put_pixel(region.x + x, region.y + y, Rgb([v, v, v]));
            }
        }
    }
    frame
}

pub(crate) fn encode_png(img: &GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("in-memory PNG encoding");
    out.into_inner()
}

/// Reports its fixed regions on any image that is not entirely black.
pub(crate) struct FixedDetector(pub Vec<FaceRegion>);

impl FaceDetector for FixedDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError> {
        if gray.pixels().all(|p| p[0] == 0) {
            return Ok(Vec::new());
        }
        Ok(self
            .0
            .iter()
            .filter_map(|r| r.clamp_to(gray.width(), gray.height()))
            .collect())
    }
}
