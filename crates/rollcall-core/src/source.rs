//! Where training samples come from.

use crate::types::Sample;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sample store unavailable: {0}")]
    Store(String),
}

/// A supplier of labeled face images.
pub trait SampleSource {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Every sample the source currently holds.
    fn samples(&self) -> Result<Vec<Sample>, SourceError>;
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn samples(&self) -> Result<Vec<Sample>, SourceError> {
        (**self).samples()
    }
}

/// Labeled-folder tree: `<root>/<person_id>/<any file>`.
///
/// Plain files at the top level are ignored. Entries are visited in name
/// order so repeated runs see the same sample order.
#[derive(Debug, Clone)]
pub struct FolderSource {
    root: PathBuf,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let io_err = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}

impl SampleSource for FolderSource {
    fn name(&self) -> &str {
        "folder"
    }

    fn samples(&self) -> Result<Vec<Sample>, SourceError> {
        let mut samples = Vec::new();
        for person_dir in sorted_entries(&self.root)? {
            if !person_dir.is_dir() {
                continue;
            }
            let Some(person_id) = person_dir.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!(path = %person_dir.display(), "skipping folder with non UTF-8 name");
                continue;
            };
            for file in sorted_entries(&person_dir)? {
                if !file.is_file() {
                    continue;
                }
                let bytes = fs::read(&file).map_err(|source| SourceError::Io {
                    path: file.clone(),
                    source,
                })?;
                samples.push(Sample::new(person_id, bytes));
            }
        }
        tracing::debug!(root = %self.root.display(), count = samples.len(), "read folder samples");
        Ok(samples)
    }
}

/// Several sources read one after another, in order.
#[derive(Default)]
pub struct ChainedSource {
    sources: Vec<Box<dyn SampleSource + Send>>,
}

impl ChainedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl SampleSource + Send + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn push(&mut self, source: Box<dyn SampleSource + Send>) {
        self.sources.push(source);
    }
}

impl SampleSource for ChainedSource {
    fn name(&self) -> &str {
        "chained"
    }

    fn samples(&self) -> Result<Vec<Sample>, SourceError> {
        let mut all = Vec::new();
        for source in &self.sources {
            let samples = source.samples()?;
            tracing::info!(source = source.name(), count = samples.len(), "collected samples");
            all.extend(samples);
        }
        Ok(all)
    }
}
