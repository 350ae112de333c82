//! Frame-by-frame face recognition against a trained LBPH model.

use crate::annotate::Annotator;
use crate::convert::grayscale;
use crate::detector::{crop_face, CascadeError, FaceDetector};
use crate::labels::{resolve_names, LabelSource, PersonRegistry, RegistryError};
use crate::lbph::{LbphError, LbphModel};
use crate::model::{ModelError, TrainedModel};
use crate::types::{Prediction, RecognitionResult, UNKNOWN_PERSON};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// Predictions at or above this distance are reported as unknown.
pub const DISTANCE_THRESHOLD: f64 = 85.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("failed to load model: {0}")]
    Model(#[from] ModelError),
    #[error("failed to resolve person names: {0}")]
    Registry(#[from] RegistryError),
    #[error("face detection failed: {0}")]
    Detect(#[from] CascadeError),
    #[error("prediction failed: {0}")]
    Predict(#[from] LbphError),
    #[error("grayscale conversion failed: {0}")]
    Convert(#[from] opencv::Error),
}

/// Whether predictions can be made at all. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerState {
    ModelLoaded,
    /// No trained model: faces are still detected but always reported unknown.
    NoModel,
}

/// Output of one [`Recognizer::recognize`] call.
#[derive(Debug, Clone)]
pub struct Recognition {
    /// Copy of the input frame with boxes and captions drawn in.
    pub frame: RgbImage,
    /// One entry per detected face, in detection order.
    pub results: Vec<RecognitionResult>,
}

/// Detects faces in a frame and names them using a read-only model.
pub struct Recognizer<D> {
    detector: D,
    model: Option<LbphModel>,
    names: Vec<String>,
    annotator: Annotator,
}

impl<D: FaceDetector> Recognizer<D> {
    /// `names[label]` is the display name of model label `label`.
    pub fn new(detector: D, model: Option<LbphModel>, names: Vec<String>) -> Self {
        Self {
            detector,
            model,
            names,
            annotator: Annotator::new(),
        }
    }

    /// Load the model at `model_path` and build the name table.
    ///
    /// A missing model file is not an error: the recognizer starts in
    /// [`RecognizerState::NoModel`].
    pub fn load(
        model_path: &Path,
        detector: D,
        registry: &dyn PersonRegistry,
        label_source: LabelSource,
    ) -> Result<Self, RecognizerError> {
        let trained = TrainedModel::load(model_path)?;
        if trained.is_none() {
            tracing::warn!(
                path = %model_path.display(),
                "no trained model found; every face will be reported as unknown"
            );
        }
        let names = resolve_names(
            label_source,
            trained.as_ref().and_then(|t| t.labels.as_ref()),
            registry,
        )?;
        tracing::info!(
            persons = names.len(),
            ?label_source,
            model = trained.is_some(),
            "recognizer ready"
        );
        Ok(Self::new(detector, trained.map(|t| t.model), names))
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn state(&self) -> RecognizerState {
        match self.model {
            Some(_) => RecognizerState::ModelLoaded,
            None => RecognizerState::NoModel,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Detect and name every face in `frame`.
    pub fn recognize(&self, frame: &RgbImage) -> Result<Recognition, RecognizerError> {
        let gray = grayscale(frame)?;
        let regions = self.detector.detect(&gray)?;

        let mut results = Vec::with_capacity(regions.len());
        for region in regions {
            let prediction = match (&self.model, crop_face(&gray, &region)) {
                (Some(model), Some(crop)) => model.predict(&crop)?,
                _ => Prediction::NONE,
            };
            let (name, confidence) = self.classify(prediction);
            tracing::debug!(?region, %name, confidence, distance = prediction.distance, "face classified");
            results.push(RecognitionResult {
                region,
                name,
                confidence,
            });
        }

        let mut annotated = frame.clone();
        self.annotator.draw_all(&mut annotated, &results);

        Ok(Recognition {
            frame: annotated,
            results,
        })
    }

    /// Apply the distance threshold and map the label to a display name.
    pub fn classify(&self, prediction: Prediction) -> (String, f64) {
        match prediction.label {
            Some(label) if prediction.distance < DISTANCE_THRESHOLD => {
                let name = self
                    .names
                    .get(label)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PERSON.to_string());
                (name, confidence_from_distance(prediction.distance))
            }
            _ => (UNKNOWN_PERSON.to_string(), 0.0),
        }
    }
}

/// `100 - distance`, clamped to [0, 100] and rounded to two decimals.
fn confidence_from_distance(distance: f64) -> f64 {
    let raw = (100.0 - distance).clamp(0.0, 100.0);
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Person;
    use crate::lbph::LbphParams;
    use crate::testing::{checkerboard_face, encode_png, frame_with, stripes_face, FixedDetector};
    use crate::trainer::Trainer;
    use crate::types::{FaceRegion, Sample};

    fn recognizer_with_names(names: &[&str]) -> Recognizer<FixedDetector> {
        Recognizer::new(
            FixedDetector(vec![]),
            None,
            names.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_threshold_is_strict() {
        let r = recognizer_with_names(&["An"]);
        let at = r.classify(Prediction {
            label: Some(0),
            distance: 85.0,
        });
        assert_eq!(at, (UNKNOWN_PERSON.to_string(), 0.0));

        let below = r.classify(Prediction {
            label: Some(0),
            distance: 84.99,
        });
        assert_eq!(below.0, "An");
        assert!((below.1 - 15.01).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_rounding() {
        assert_eq!(confidence_from_distance(12.3456), 87.65);
        assert_eq!(confidence_from_distance(0.0), 100.0);
        assert_eq!(confidence_from_distance(-3.0), 100.0);
    }

    #[test]
    fn test_unmapped_label_is_unknown() {
        let r = recognizer_with_names(&["An"]);
        let (name, confidence) = r.classify(Prediction {
            label: Some(4),
            distance: 10.0,
        });
        assert_eq!(name, UNKNOWN_PERSON);
        assert_eq!(confidence, 90.0);
    }

    #[test]
    fn test_no_model_mode() {
        let dir = tempfile::tempdir().unwrap();
        let registry = vec![Person {
            id: "S001".into(),
            name: "An".into(),
        }];
        let region = FaceRegion::new(10, 10, 60, 60);
        let recognizer = Recognizer::load(
            &dir.path().join("trainer.yml"),
            FixedDetector(vec![region]),
            &registry,
            LabelSource::Model,
        )
        .unwrap();
        assert_eq!(recognizer.state(), RecognizerState::NoModel);

        let face = checkerboard_face(60, 4);
        let out = recognizer.recognize(&frame_with(120, 100, &[(region, &face)])).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].name, UNKNOWN_PERSON);
        assert_eq!(out.results[0].confidence, 0.0);
    }

    #[test]
    fn test_empty_frame_returns_empty_results() {
        let model = LbphModel::fit(LbphParams::training(), &[checkerboard_face(40, 4)], &[0]).unwrap();
        let recognizer = Recognizer::new(
            FixedDetector(vec![FaceRegion::new(0, 0, 40, 40)]),
            Some(model),
            vec!["An".into()],
        );
        let frame = RgbImage::new(80, 60);
        let out = recognizer.recognize(&frame).unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.frame.dimensions(), (80, 60));
    }

    #[test]
    fn test_train_then_recognize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer").join("trainer.yml");
        let face = checkerboard_face(60, 4);

        let trainer = Trainer::new(FixedDetector(vec![FaceRegion::new(0, 0, 60, 60)]), &path);
        let outcome = trainer
            .train(vec![Sample::new("S001", encode_png(&face))])
            .unwrap();
        assert_eq!(outcome.persons_trained, 1);

        let registry = vec![Person {
            id: "S001".into(),
            name: "Nguyen Van An".into(),
        }];
        let region = FaceRegion::new(20, 30, 60, 60);
        let recognizer =
            Recognizer::load(&path, FixedDetector(vec![region]), &registry, LabelSource::Model).unwrap();
        assert_eq!(recognizer.state(), RecognizerState::ModelLoaded);

        let out = recognizer.recognize(&frame_with(160, 120, &[(region, &face)])).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].name, "Nguyen Van An");
        assert!(out.results[0].confidence > 15.0);
        assert_eq!(out.results[0].region, region);
    }

    #[test]
    fn test_two_faces_in_detection_order() {
        let faces = vec![checkerboard_face(50, 4), stripes_face(50, 5)];
        let model = LbphModel::fit(LbphParams::training(), &faces, &[0, 1]).unwrap();
        let left = FaceRegion::new(10, 20, 50, 50);
        let right = FaceRegion::new(100, 20, 50, 50);
        let recognizer = Recognizer::new(
            FixedDetector(vec![left, right]),
            Some(model),
            vec!["An".into(), "Binh".into()],
        );

        let frame = frame_with(160, 90, &[(left, &faces[0]), (right, &faces[1])]);
        let out = recognizer.recognize(&frame).unwrap();
        assert_eq!(out.results.len(), 2);
        assert!(!out.results[0].region.overlaps(&out.results[1].region));
        assert_eq!(out.results[0].region, left);
        assert_eq!(out.results[0].name, "An");
        assert_eq!(out.results[1].name, "Binh");
    }

    #[test]
    fn test_cascade_pipeline_keeps_detection_order() {
        use crate::detector::fixtures::{canvas, paint_pattern, write_cascade};
        use crate::detector::{CascadeDetector, DetectionParams};

        // Sequential scanning keeps OpenCV's candidate order, and with it the
        // output order, identical between calls.
        opencv::core::set_num_threads(1).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cascade = write_cascade(dir.path());
        let path = dir.path().join("trainer.yml");

        let mut sample = canvas(120, 120);
        paint_pattern(&mut sample, 40, 40, 40);
        let trainer = Trainer::new(
            CascadeDetector::load(&cascade, DetectionParams::training()).unwrap(),
            &path,
        );
        assert_eq!(
            trainer
                .train(vec![Sample::new("S001", encode_png(&sample))])
                .unwrap()
                .persons_trained,
            1
        );

        let small = FaceRegion::new(30, 60, 40, 40);
        let large = FaceRegion::new(260, 50, 60, 60);
        let mut gray = canvas(400, 160);
        paint_pattern(&mut gray, small.x, small.y, small.width);
        paint_pattern(&mut gray, large.x, large.y, large.width);
        let frame = image::DynamicImage::ImageLuma8(gray.clone()).to_rgb8();

        let detector = CascadeDetector::load(&cascade, DetectionParams::recognition()).unwrap();
        let expected = detector.detect(&gray).unwrap();
        assert_eq!(expected.len(), 2, "{expected:?}");

        let registry = vec![Person {
            id: "S001".into(),
            name: "An".into(),
        }];
        let recognizer = Recognizer::load(&path, detector, &registry, LabelSource::Model).unwrap();
        assert_eq!(recognizer.state(), RecognizerState::ModelLoaded);
        let out = recognizer.recognize(&frame).unwrap();

        let regions: Vec<FaceRegion> = out.results.iter().map(|r| r.region).collect();
        assert_eq!(regions, expected);
        let hits_small = regions.iter().filter(|r| r.overlaps(&small)).count();
        let hits_large = regions.iter().filter(|r| r.overlaps(&large)).count();
        assert_eq!((hits_small, hits_large), (1, 1));
        for result in &out.results {
            assert!(result.name == "An" || result.name == UNKNOWN_PERSON);
        }
    }

    #[test]
    fn test_registry_label_source() {
        let model = LbphModel::fit(LbphParams::training(), &[stripes_face(50, 5)], &[0]).unwrap();
        let labels: crate::labels::LabelIndex = ["S002"].into_iter().collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.yml");
        TrainedModel::new(model, labels).unwrap().save(&path).unwrap();

        let registry = vec![
            Person {
                id: "S001".into(),
                name: "An".into(),
            },
            Person {
                id: "S002".into(),
                name: "Binh".into(),
            },
        ];
        let by_model = Recognizer::load(&path, FixedDetector(vec![]), &registry, LabelSource::Model).unwrap();
        assert_eq!(by_model.names(), ["Binh".to_string()]);
        let by_registry =
            Recognizer::load(&path, FixedDetector(vec![]), &registry, LabelSource::Registry).unwrap();
        assert_eq!(by_registry.names(), ["An".to_string(), "Binh".to_string()]);
    }
}
