//! Local Binary Pattern Histograms (LBPH) appearance model, backed by
//! OpenCV's `face::LBPHFaceRecognizer`.

use crate::convert::gray_to_mat;
use crate::types::Prediction;
use image::GrayImage;
use opencv::core::{Mat, Ptr, Vector};
use opencv::face::{FaceRecognizerTrait, FaceRecognizerTraitConst, LBPHFaceRecognizer};
use opencv::prelude::*;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LbphError {
    #[error("cannot fit a model without training faces")]
    EmptyTrainingSet,
    #[error("{faces} faces but {labels} labels")]
    LabelCountMismatch { faces: usize, labels: usize },
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("path {0} is not valid UTF-8")]
    Path(String),
    #[error("OpenCV: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Operator and grid settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    /// Settings the attendance model is trained with.
    pub const fn training() -> Self {
        Self {
            radius: 1,
            neighbors: 5,
            grid_x: 5,
            grid_y: 5,
        }
    }

    pub fn validate(&self) -> Result<(), LbphError> {
        if self.radius == 0 {
            return Err(LbphError::InvalidParams("radius must be at least 1".into()));
        }
        if !(1..=16).contains(&self.neighbors) {
            return Err(LbphError::InvalidParams(format!(
                "neighbors must be in 1..=16, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(LbphError::InvalidParams("grid must be at least 1x1".into()));
        }
        Ok(())
    }

    fn create(&self) -> Result<Ptr<LBPHFaceRecognizer>, LbphError> {
        // Unbounded threshold: the caller applies its own cut-off to the distance.
        Ok(LBPHFaceRecognizer::create(
            self.radius as i32,
            self.neighbors as i32,
            self.grid_x as i32,
            self.grid_y as i32,
            f64::MAX,
        )?)
    }
}

/// A fitted LBPH model: one histogram and one label per training face.
pub struct LbphModel {
    recognizer: Ptr<LBPHFaceRecognizer>,
}

impl fmt::Debug for LbphModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LbphModel")
            .field("params", &self.params().ok())
            .field("faces", &self.len().ok())
            .finish()
    }
}

impl LbphModel {
    /// Fit a model over `faces`, where `labels[i]` is the label of `faces[i]`.
    pub fn fit(params: LbphParams, faces: &[GrayImage], labels: &[usize]) -> Result<Self, LbphError> {
        params.validate()?;
        if faces.is_empty() {
            return Err(LbphError::EmptyTrainingSet);
        }
        if faces.len() != labels.len() {
            return Err(LbphError::LabelCountMismatch {
                faces: faces.len(),
                labels: labels.len(),
            });
        }

        let mut images = Vector::<Mat>::new();
        for face in faces {
            images.push(gray_to_mat(face)?);
        }
        let labels: Vector<i32> = labels.iter().map(|&l| l as i32).collect();

        let mut recognizer = params.create()?;
        recognizer.train(&images, &labels)?;
        Ok(Self { recognizer })
    }

    /// Read a model written by [`LbphModel::write`] (or by any other OpenCV
    /// LBPH user) from `path`.
    pub fn read(path: &Path) -> Result<Self, LbphError> {
        let mut recognizer = LbphParams::default().create()?;
        FaceRecognizerTrait::read(&mut recognizer, path_str(path)?)?;
        Ok(Self { recognizer })
    }

    /// Serialize in OpenCV's own format; the file extension picks YAML, XML or JSON.
    pub fn write(&self, path: &Path) -> Result<(), LbphError> {
        FaceRecognizerTraitConst::write(&self.recognizer, path_str(path)?)?;
        Ok(())
    }

    pub fn params(&self) -> Result<LbphParams, LbphError> {
        Ok(LbphParams {
            radius: self.recognizer.get_radius()? as u32,
            neighbors: self.recognizer.get_neighbors()? as u32,
            grid_x: self.recognizer.get_grid_x()? as u32,
            grid_y: self.recognizer.get_grid_y()? as u32,
        })
    }

    /// Training labels, one per stored histogram.
    pub fn labels(&self) -> Result<Vec<usize>, LbphError> {
        let labels = self.recognizer.get_labels()?;
        if labels.empty() {
            return Ok(Vec::new());
        }
        Ok(labels.data_typed::<i32>()?.iter().map(|&l| l.max(0) as usize).collect())
    }

    /// Number of training faces.
    pub fn len(&self) -> Result<usize, LbphError> {
        Ok(self.recognizer.get_labels()?.rows().max(0) as usize)
    }

    /// Free-form text stored next to `label` in the model file.
    pub fn label_info(&self, label: usize) -> Result<Option<String>, LbphError> {
        let info = self.recognizer.get_label_info(label as i32)?;
        Ok(Some(info).filter(|s| !s.is_empty()))
    }

    pub fn set_label_info(&mut self, label: usize, info: &str) -> Result<(), LbphError> {
        self.recognizer.set_label_info(label as i32, info)?;
        Ok(())
    }

    /// Label and chi-square distance of the closest training face.
    pub fn predict(&self, face: &GrayImage) -> Result<Prediction, LbphError> {
        let mat = gray_to_mat(face)?;
        let mut label = -1;
        let mut distance = f64::MAX;
        self.recognizer.predict(&mat, &mut label, &mut distance)?;
        if label < 0 {
            return Ok(Prediction::NONE);
        }
        Ok(Prediction {
            label: Some(label as usize),
            distance,
        })
    }
}

fn path_str(path: &Path) -> Result<&str, LbphError> {
    path.to_str().ok_or_else(|| LbphError::Path(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checkerboard_face, stripes_face};

    #[test]
    fn test_training_params() {
        let p = LbphParams::training();
        assert_eq!((p.radius, p.neighbors, p.grid_x, p.grid_y), (1, 5, 5, 5));
        assert!(p.validate().is_ok());
        assert_eq!(LbphParams::default().neighbors, 8);
    }

    #[test]
    fn test_invalid_params() {
        let zero_radius = LbphParams {
            radius: 0,
            ..LbphParams::default()
        };
        assert!(zero_radius.validate().is_err());
        let too_many = LbphParams {
            neighbors: 17,
            ..LbphParams::default()
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_fit_rejects_empty() {
        assert!(matches!(
            LbphModel::fit(LbphParams::training(), &[], &[]),
            Err(LbphError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_fit_rejects_label_mismatch() {
        let faces = vec![checkerboard_face(40, 4)];
        assert!(matches!(
            LbphModel::fit(LbphParams::training(), &faces, &[0, 1]),
            Err(LbphError::LabelCountMismatch { faces: 1, labels: 2 })
        ));
    }

    #[test]
    fn test_predict_nearest_label() {
        let faces = vec![checkerboard_face(40, 4), stripes_face(40, 5)];
        let model = LbphModel::fit(LbphParams::training(), &faces, &[0, 1]).unwrap();
        assert_eq!(model.len().unwrap(), 2);
        assert_eq!(model.labels().unwrap(), vec![0, 1]);
        assert_eq!(model.params().unwrap(), LbphParams::training());

        let p = model.predict(&stripes_face(40, 5)).unwrap();
        assert_eq!(p.label, Some(1));
        assert!(p.distance < 1e-6, "identical crop, got {}", p.distance);

        let p = model.predict(&checkerboard_face(40, 4)).unwrap();
        assert_eq!(p.label, Some(0));
    }

    #[test]
    fn test_write_read_keeps_params_and_label_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbph.yml");
        let mut model =
            LbphModel::fit(LbphParams::training(), &[checkerboard_face(40, 4)], &[0]).unwrap();
        model.set_label_info(0, "S001").unwrap();
        model.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("%YAML"), "expected OpenCV YAML, got {:?}", &text[..20.min(text.len())]);

        let back = LbphModel::read(&path).unwrap();
        assert_eq!(back.params().unwrap(), LbphParams::training());
        assert_eq!(back.label_info(0).unwrap().as_deref(), Some("S001"));
        assert_eq!(back.label_info(1).unwrap(), None);
        assert_eq!(back.predict(&checkerboard_face(40, 4)).unwrap().label, Some(0));
    }
}
