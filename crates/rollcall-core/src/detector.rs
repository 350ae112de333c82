//! Face detection: the [`FaceDetector`] seam and its OpenCV Haar cascade implementation.

use crate::convert::gray_to_mat;
use crate::types::FaceRegion;
use image::GrayImage;
use opencv::core::{Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}; point ROLLCALL_CASCADE_PATH at haarcascade_frontalface_default.xml")]
    NotFound(PathBuf),
    #[error("{0} is not a usable cascade classifier")]
    Invalid(PathBuf),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("OpenCV: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Multi-scale detection settings, passed straight to `detectMultiScale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Pyramid step between scales. Must be greater than 1.
    pub scale_factor: f64,
    /// A face is reported only when more than this many window hits agree.
    /// Zero disables grouping and returns every raw hit.
    pub min_neighbors: u32,
    /// Smallest face, in pixels, worth looking for.
    pub min_size: (u32, u32),
    /// Largest face to look for; defaults to the whole image.
    #[serde(default)]
    pub max_size: Option<(u32, u32)>,
}

impl DetectionParams {
    /// Settings used on live frames.
    pub const fn recognition() -> Self {
        Self {
            scale_factor: 1.2,
            min_neighbors: 7,
            min_size: (30, 30),
            max_size: None,
        }
    }

    /// Settings used when cropping faces out of training samples.
    pub const fn training() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
            max_size: None,
        }
    }

    pub fn validate(&self) -> Result<(), CascadeError> {
        if !(self.scale_factor > 1.0) || !self.scale_factor.is_finite() {
            return Err(CascadeError::InvalidParams(format!(
                "scale_factor must be a finite value above 1.0, got {}",
                self.scale_factor
            )));
        }
        if let Some((w, h)) = self.max_size {
            if w < self.min_size.0 || h < self.min_size.1 {
                return Err(CascadeError::InvalidParams(format!(
                    "max_size {w}x{h} is smaller than min_size {}x{}",
                    self.min_size.0, self.min_size.1
                )));
            }
        }
        Ok(())
    }

    fn min_size_cv(&self) -> Size {
        Size::new(self.min_size.0 as i32, self.min_size.1 as i32)
    }

    fn max_size_cv(&self) -> Size {
        self.max_size
            .map(|(w, h)| Size::new(w as i32, h as i32))
            .unwrap_or_default()
    }
}

/// Strategy for locating faces in a grayscale image.
pub trait FaceDetector {
    /// Detected faces in detector order.
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError>;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Arc<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError> {
        (**self).detect(gray)
    }
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError> {
        (**self).detect(gray)
    }
}

/// Haar cascade detector with fixed parameters.
///
/// Cheap to clone: the loaded classifier is shared. OpenCV mutates the
/// classifier while scanning, so calls are serialized on it.
#[derive(Clone)]
pub struct CascadeDetector {
    classifier: Arc<Mutex<CascadeClassifier>>,
    params: DetectionParams,
}

impl CascadeDetector {
    /// Load an OpenCV cascade XML file and wrap it with `params`.
    pub fn load(path: &Path, params: DetectionParams) -> Result<Self, CascadeError> {
        params.validate()?;
        if !path.is_file() {
            return Err(CascadeError::NotFound(path.to_path_buf()));
        }
        let name = path
            .to_str()
            .ok_or_else(|| CascadeError::Invalid(path.to_path_buf()))?;
        let classifier = CascadeClassifier::new(name)?;
        if classifier.empty()? {
            return Err(CascadeError::Invalid(path.to_path_buf()));
        }
        tracing::info!(path = %path.display(), "cascade loaded");
        Ok(Self {
            classifier: Arc::new(Mutex::new(classifier)),
            params,
        })
    }

    /// Same classifier, different parameters.
    pub fn with_params(&self, params: DetectionParams) -> Result<Self, CascadeError> {
        params.validate()?;
        Ok(Self {
            classifier: Arc::clone(&self.classifier),
            params,
        })
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError> {
        if gray.width() == 0 || gray.height() == 0 {
            return Ok(Vec::new());
        }
        let mat = gray_to_mat(gray)?;
        let mut rects = Vector::<Rect>::new();
        {
            let mut classifier = self.classifier.lock().unwrap_or_else(PoisonError::into_inner);
            classifier.detect_multi_scale(
                &mat,
                &mut rects,
                self.params.scale_factor,
                self.params.min_neighbors as i32,
                0,
                self.params.min_size_cv(),
                self.params.max_size_cv(),
            )?;
        }

        let faces: Vec<FaceRegion> = rects
            .iter()
            .filter_map(|r| region_from_rect(r, gray.width(), gray.height()))
            .collect();
        tracing::debug!(
            width = gray.width(),
            height = gray.height(),
            faces = faces.len(),
            "cascade detection"
        );
        Ok(faces)
    }
}

fn region_from_rect(r: Rect, width: u32, height: u32) -> Option<FaceRegion> {
    let x = r.x.max(0) as u32;
    let y = r.y.max(0) as u32;
    let right = (r.x + r.width).max(0) as u32;
    let bottom = (r.y + r.height).max(0) as u32;
    FaceRegion::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y)).clamp_to(width, height)
}

/// Crop `region` out of `gray`, clipped to the image bounds.
pub fn crop_face(gray: &GrayImage, region: &FaceRegion) -> Option<GrayImage> {
    let r = region.clamp_to(gray.width(), gray.height())?;
    Some(image::imageops::crop_imm(gray, r.x, r.y, r.width, r.height).to_image())
}
