//! Frame type and pixel conversion: YUYV/GREY/Y16 to RGB, dark detection.

use image::RgbImage;

/// A captured camera frame, converted to RGB.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YCbCr to RGB, integer arithmetic.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", yuyv, expected)?;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    to_image(width, height, rgb)
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("GREY", grey, pixels)?;
    let rgb = grey[..pixels].iter().flat_map(|&g| [g, g, g]).collect();
    to_image(width, height, rgb)
}

/// 16-bit little-endian grayscale to RGB, keeping the high byte.
pub fn y16_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("Y16", buf, pixels * 2)?;
    let rgb = buf[..pixels * 2]
        .chunks_exact(2)
        .flat_map(|px| {
            let g = (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8;
            [g, g, g]
        })
        .collect();
    to_image(width, height, rgb)
}

/// Decode one Motion-JPEG frame.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)?.to_rgb8())
}

fn to_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<RgbImage, FrameError> {
    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        format: "RGB",
        expected: (width * height * 3) as usize,
        actual,
    })
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return true;
    }
    let dark = image
        .pixels()
        .filter(|p| {
            let [r, g, b] = p.0;
            // Rec.601 luma, integer approximation.
            (77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8 < 32
        })
        .count();
    (dark as f32 / total as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1: black pixel then white pixel, neutral chroma.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Pure red in BT.601: Y=81, U=90, V=240.
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let Rgb([r, g, b]) = *rgb.get_pixel(0, 0);
        assert!(r > 250 && g < 5 && b < 5, "got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { format: "YUYV", .. })
        ));
    }

    #[test]
    fn test_grey_expands_channels() {
        let rgb = grey_to_rgb(&[10, 20, 30, 40], 2, 2).unwrap();
        assert_eq!(*rgb.get_pixel(1, 1), Rgb([40, 40, 40]));
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let rgb = y16_to_rgb(&[0xff, 0x12, 0x00, 0xab], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0x12, 0x12, 0x12]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([0xab, 0xab, 0xab]));
    }

    #[test]
    fn test_mjpeg_garbage_fails() {
        assert!(matches!(mjpeg_to_rgb(b"nope"), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&RgbImage::new(10, 10), 0.95));
        assert!(!is_dark_frame(&RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])), 0.95));
        assert!(is_dark_frame(&RgbImage::new(0, 0), 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 94 dark pixels out of 100 is not dark at 95%.
        let mut img = RgbImage::from_pixel(10, 10, Rgb([10, 10, 10]));
        for x in 0..6 {
            img.put_pixel(x, 0, Rgb([200, 200, 200]));
        }
        assert!(!is_dark_frame(&img, 0.95));
    }
}
