//! Preparing image files for storage.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted for import, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// Stored images are downscaled to fit inside this square.
pub const MAX_STORED_SIDE: u32 = 500;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("{0} is not a supported image file (expected jpg, jpeg, png, gif or bmp)")]
    UnsupportedExtension(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read an image file and return the bytes to store.
///
/// Images larger than [`MAX_STORED_SIDE`] on either side are shrunk,
/// keeping aspect ratio, and re-encoded in their original format. Smaller
/// images are stored unchanged.
pub fn prepare_image(path: &Path) -> Result<Vec<u8>, ImportError> {
    if !is_supported_image(path) {
        return Err(ImportError::UnsupportedExtension(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let image_err = |source| ImportError::Image {
        path: path.to_path_buf(),
        source,
    };

    let format = image::guess_format(&bytes).map_err(image_err)?;
    let img = image::load_from_memory_with_format(&bytes, format).map_err(image_err)?;
    if img.width() <= MAX_STORED_SIDE && img.height() <= MAX_STORED_SIDE {
        return Ok(bytes);
    }

    let small = img.resize(MAX_STORED_SIDE, MAX_STORED_SIDE, image::imageops::FilterType::Triangle);
    tracing::debug!(
        path = %path.display(),
        from = ?(img.width(), img.height()),
        to = ?(small.width(), small.height()),
        "downscaled image for storage"
    );
    encode(&small, format).map_err(image_err)
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    // JPEG has no alpha channel.
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img.clone(),
    };
    img.write_to(&mut out, format)?;
    Ok(out.into_inner())
}
