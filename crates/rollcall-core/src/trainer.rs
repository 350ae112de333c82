//! Turns labeled samples into a persisted LBPH model.

use crate::convert::grayscale;
use crate::detector::{crop_face, CascadeError, FaceDetector};
use crate::labels::LabelIndex;
use crate::lbph::{LbphError, LbphModel, LbphParams};
use crate::model::{ModelError, TrainedModel};
use crate::source::{SampleSource, SourceError};
use crate::types::Sample;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("failed to collect samples: {0}")]
    Source(#[from] SourceError),
    #[error("face detection failed: {0}")]
    Detect(#[from] CascadeError),
    #[error("grayscale conversion failed: {0}")]
    Convert(#[from] opencv::Error),
    #[error("model fit failed: {0}")]
    Fit(#[from] LbphError),
    #[error("failed to persist model: {0}")]
    Model(#[from] ModelError),
}

/// What a training run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingOutcome {
    /// Distinct persons with at least one usable face. Zero means nothing was written.
    pub persons_trained: usize,
    /// Face crops the model was fit on.
    pub faces_used: usize,
    /// Samples whose bytes could not be decoded.
    pub samples_skipped: usize,
    /// Label assignment of the written model.
    pub labels: LabelIndex,
}

/// Trains the appearance model and writes it to `model_path`.
pub struct Trainer<D> {
    detector: D,
    params: LbphParams,
    model_path: PathBuf,
}

impl<D: FaceDetector> Trainer<D> {
    /// `detector` should be configured for still images, e.g. with
    /// [`DetectionParams::training`](crate::DetectionParams::training).
    pub fn new(detector: D, model_path: impl Into<PathBuf>) -> Self {
        Self {
            detector,
            params: LbphParams::training(),
            model_path: model_path.into(),
        }
    }

    pub fn with_params(mut self, params: LbphParams) -> Self {
        self.params = params;
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Read every sample from `source` and train on them.
    pub fn train_from(&self, source: &dyn SampleSource) -> Result<TrainingOutcome, TrainError> {
        let samples = source.samples()?;
        tracing::info!(source = source.name(), count = samples.len(), "training from source");
        self.train(samples)
    }

    /// Detect faces in every sample, fit one model over all of them and
    /// replace the model file.
    ///
    /// Undecodable samples and samples without a detectable face are
    /// skipped. When no face is found at all, nothing is written and the
    /// previous model stays in place.
    pub fn train<I>(&self, samples: I) -> Result<TrainingOutcome, TrainError>
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut faces: Vec<GrayImage> = Vec::new();
        let mut owners: Vec<String> = Vec::new();
        let mut skipped = 0usize;
        let mut seen = 0usize;

        for sample in samples {
            seen += 1;
            let rgb = match image::load_from_memory(&sample.image_bytes) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(person = %sample.person_id, error = %e, "skipping undecodable sample");
                    skipped += 1;
                    continue;
                }
            };

            let gray = grayscale(&rgb)?;
            let regions = self.detector.detect(&gray)?;
            if regions.is_empty() {
                tracing::debug!(person = %sample.person_id, "no face in sample");
                continue;
            }
            for region in &regions {
                if let Some(crop) = crop_face(&gray, region) {
                    faces.push(crop);
                    owners.push(sample.person_id.clone());
                }
            }
        }

        if faces.is_empty() {
            tracing::warn!(samples = seen, skipped, "no faces found in training samples; model left untouched");
            return Ok(TrainingOutcome {
                persons_trained: 0,
                faces_used: 0,
                samples_skipped: skipped,
                labels: LabelIndex::new(),
            });
        }

        let mut index = LabelIndex::new();
        let labels: Vec<usize> = owners.iter().map(|id| index.assign(id)).collect();

        tracing::info!(faces = faces.len(), persons = index.len(), "fitting LBPH model");
        let model = LbphModel::fit(self.params, &faces, &labels)?;
        TrainedModel::new(model, index.clone())?.save(&self.model_path)?;

        tracing::info!(
            persons = index.len(),
            faces = faces.len(),
            skipped,
            "training complete"
        );
        Ok(TrainingOutcome {
            persons_trained: index.len(),
            faces_used: faces.len(),
            samples_skipped: skipped,
            labels: index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checkerboard_face, encode_png, stripes_face, FixedDetector};
    use crate::types::FaceRegion;
    use std::fs;

    fn whole_face() -> FixedDetector {
        FixedDetector(vec![FaceRegion::new(0, 0, 60, 60)])
    }

    fn blank() -> Vec<u8> {
        encode_png(&GrayImage::new(60, 60))
    }

    #[test]
    fn test_one_face_one_blank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer").join("trainer.yml");
        let trainer = Trainer::new(whole_face(), &path);

        let outcome = trainer
            .train(vec![
                Sample::new("S001", encode_png(&checkerboard_face(60, 4))),
                Sample::new("S002", blank()),
            ])
            .unwrap();

        assert_eq!(outcome.persons_trained, 1);
        assert_eq!(outcome.faces_used, 1);
        assert_eq!(outcome.labels.len(), 1);
        assert_eq!(outcome.labels.person_id(0), Some("S001"));
        assert_eq!(outcome.labels.label_of("S002"), None);
        assert!(path.exists(), "model directory and file should be created");
    }

    #[test]
    fn test_no_faces_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.yml");
        let trainer = Trainer::new(whole_face(), &path);

        trainer
            .train(vec![Sample::new("S001", encode_png(&checkerboard_face(60, 4)))])
            .unwrap();
        let before = fs::read(&path).unwrap();

        let outcome = trainer
            .train(vec![Sample::new("S001", blank()), Sample::new("S002", blank())])
            .unwrap();
        assert_eq!(outcome.persons_trained, 0);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.yml");
        let outcome = Trainer::new(whole_face(), &path).train(Vec::new()).unwrap();
        assert_eq!(outcome.persons_trained, 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_undecodable_sample_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = Trainer::new(whole_face(), dir.path().join("trainer.yml"));
        let outcome = trainer
            .train(vec![
                Sample::new("S001", b"definitely not an image".to_vec()),
                Sample::new("S002", encode_png(&stripes_face(60, 5))),
            ])
            .unwrap();
        assert_eq!(outcome.samples_skipped, 1);
        assert_eq!(outcome.persons_trained, 1);
        assert_eq!(outcome.labels.person_id(0), Some("S002"));
    }

    #[test]
    fn test_person_count_and_encounter_order() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = Trainer::new(whole_face(), dir.path().join("trainer.yml"));
        let face_a = encode_png(&checkerboard_face(60, 4));
        let face_b = encode_png(&stripes_face(60, 5));

        let outcome = trainer
            .train(vec![
                Sample::new("S003", face_b.clone()),
                Sample::new("S001", face_a.clone()),
                Sample::new("S003", face_a.clone()),
                Sample::new("S004", blank()),
            ])
            .unwrap();
        assert_eq!(outcome.persons_trained, 2);
        assert_eq!(outcome.faces_used, 3);
        assert_eq!(outcome.labels.label_of("S003"), Some(0));
        assert_eq!(outcome.labels.label_of("S001"), Some(1));

        let rerun = trainer
            .train(vec![
                Sample::new("S003", face_a),
                Sample::new("S001", face_b),
                Sample::new("S004", blank()),
            ])
            .unwrap();
        assert_eq!(rerun.labels, outcome.labels);
    }

    #[test]
    fn test_multiple_faces_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let detector = FixedDetector(vec![
            FaceRegion::new(0, 0, 30, 30),
            FaceRegion::new(30, 30, 30, 30),
        ]);
        let trainer = Trainer::new(detector, dir.path().join("trainer.yml"));
        let outcome = trainer
            .train(vec![Sample::new("S001", encode_png(&checkerboard_face(60, 4)))])
            .unwrap();
        assert_eq!(outcome.faces_used, 2);
        assert_eq!(outcome.persons_trained, 1);
    }

    #[test]
    fn test_trains_through_cascade_detector() {
        use crate::detector::fixtures::{canvas, paint_pattern, write_cascade};
        use crate::detector::{CascadeDetector, DetectionParams};

        let dir = tempfile::tempdir().unwrap();
        let detector =
            CascadeDetector::load(&write_cascade(dir.path()), DetectionParams::training()).unwrap();
        let path = dir.path().join("trainer.yml");
        let trainer = Trainer::new(detector, &path);

        let mut with_face = canvas(120, 120);
        paint_pattern(&mut with_face, 40, 40, 40);
        let outcome = trainer
            .train(vec![
                Sample::new("S001", encode_png(&with_face)),
                Sample::new("S002", encode_png(&canvas(120, 120))),
            ])
            .unwrap();
        assert_eq!(outcome.persons_trained, 1);
        assert!(outcome.faces_used >= 1);
        assert_eq!(outcome.labels.person_id(0), Some("S001"));
        let saved = TrainedModel::load(&path).unwrap().unwrap();
        assert_eq!(saved.labels, Some(outcome.labels));
    }

    #[test]
    fn test_train_from_source_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = Trainer::new(whole_face(), dir.path().join("trainer.yml"));
        let source = crate::source::FolderSource::new(dir.path().join("missing"));
        assert!(matches!(trainer.train_from(&source), Err(TrainError::Source(_))));
    }
}
