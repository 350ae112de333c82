//! On-disk form of a trained model: an OpenCV LBPH file whose per-label
//! info strings carry the person id each label was trained for.

use crate::labels::LabelIndex;
use crate::lbph::{LbphError, LbphModel};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model file {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: LbphError,
    },
    #[error("model file {0} holds no training faces")]
    Empty(PathBuf),
    #[error("model access failed: {0}")]
    Lbph(#[from] LbphError),
    #[error("model labels {max_label} but its label index only has {index_len} entries")]
    LabelIndexMismatch { max_label: usize, index_len: usize },
}

/// A fitted model together with its label index.
///
/// `labels` is `None` for model files written without label info, such as
/// those produced by other OpenCV LBPH trainers.
#[derive(Debug)]
pub struct TrainedModel {
    pub model: LbphModel,
    pub labels: Option<LabelIndex>,
}

impl TrainedModel {
    /// Attach `labels` to `model`, recording each person id as label info.
    pub fn new(mut model: LbphModel, labels: LabelIndex) -> Result<Self, ModelError> {
        if let Some(max_label) = model.labels()?.into_iter().max() {
            if max_label >= labels.len() {
                return Err(ModelError::LabelIndexMismatch {
                    max_label,
                    index_len: labels.len(),
                });
            }
        }
        for (label, person_id) in labels.iter().enumerate() {
            model.set_label_info(label, person_id)?;
        }
        Ok(Self {
            model,
            labels: Some(labels),
        })
    }

    /// Write the model to `path`, replacing any previous file atomically.
    ///
    /// The parent directory is created when missing. OpenCV writes a sibling
    /// temp file with the same extension, which is then renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }

        let tmp = temp_path(path);
        if let Err(e) = self.model.write(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, path).map_err(io_err(path))?;

        tracing::info!(
            path = %path.display(),
            faces = self.model.len()?,
            persons = self.labels.as_ref().map_or(0, LabelIndex::len),
            "model saved"
        );
        Ok(())
    }

    /// Read a model from `path`. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ModelError> {
        match fs::metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ModelError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        let model = LbphModel::read(path).map_err(|source| ModelError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        if model.len()? == 0 {
            return Err(ModelError::Empty(path.to_path_buf()));
        }
        let labels = stored_label_index(&model)?;
        if labels.is_none() {
            tracing::warn!(
                path = %path.display(),
                "model carries no label info; labels follow registry order"
            );
        }

        tracing::info!(
            path = %path.display(),
            faces = model.len()?,
            persons = labels.as_ref().map_or(0, LabelIndex::len),
            "model loaded"
        );
        Ok(Some(Self { model, labels }))
    }
}

/// Rebuild the label index from label info, if every label has a distinct id.
fn stored_label_index(model: &LbphModel) -> Result<Option<LabelIndex>, ModelError> {
    let Some(max_label) = model.labels()?.into_iter().max() else {
        return Ok(None);
    };
    let mut index = LabelIndex::new();
    for label in 0..=max_label {
        let Some(id) = model.label_info(label)? else {
            return Ok(None);
        };
        if index.assign(&id) != label {
            return Ok(None);
        }
    }
    Ok(Some(index))
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ModelError {
    let path = path.to_path_buf();
    move |source| ModelError::Io { path, source }
}

/// `trainer.yml` → `trainer.tmp.yml`; the extension is kept so OpenCV picks
/// the same serialization format.
fn temp_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".into());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yml".into());
    path.with_file_name(format!("{stem}.tmp.{ext}"))
}
