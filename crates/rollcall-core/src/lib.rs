//! rollcall-core: Face detection and recognition engine.
//!
//! Faces are found with an OpenCV Haar cascade and identified with an
//! OpenCV LBPH (Local Binary Pattern Histograms) model.

pub mod annotate;
pub mod capture;
pub mod convert;
pub mod detector;
pub mod labels;
pub mod lbph;
pub mod model;
pub mod recognizer;
pub mod source;
pub mod trainer;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use annotate::Annotator;
pub use capture::{CaptureEvent, CaptureSession, CaptureState};
pub use convert::grayscale;
pub use detector::{CascadeDetector, CascadeError, DetectionParams, FaceDetector};
pub use labels::{LabelIndex, LabelSource, Person, PersonRegistry};
pub use lbph::{LbphModel, LbphParams};
pub use model::{ModelError, TrainedModel};
pub use recognizer::{Recognition, Recognizer, RecognizerError, RecognizerState};
pub use source::{ChainedSource, FolderSource, SampleSource, SourceError};
pub use trainer::{Trainer, TrainingOutcome};
pub use types::{FaceRegion, Prediction, RecognitionResult, Sample, UNKNOWN_PERSON};
pub use worker::{TrainingHandle, TrainingWorker};
