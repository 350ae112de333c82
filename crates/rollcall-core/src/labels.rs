//! Label index and the person registry it is resolved against.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Dense mapping between model labels `0..N` and person identifiers.
///
/// Labels are handed out in first-encounter order and are only meaningful
/// next to the model they were trained with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LabelIndex {
    ids: Vec<String>,
    by_id: HashMap<String, usize>,
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label of `person_id`, assigning the next free one on first sight.
    pub fn assign(&mut self, person_id: &str) -> usize {
        if let Some(&label) = self.by_id.get(person_id) {
            return label;
        }
        let label = self.ids.len();
        self.ids.push(person_id.to_string());
        self.by_id.insert(person_id.to_string(), label);
        label
    }

    pub fn label_of(&self, person_id: &str) -> Option<usize> {
        self.by_id.get(person_id).copied()
    }

    pub fn person_id(&self, label: usize) -> Option<&str> {
        self.ids.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Person ids in label order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for LabelIndex {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut index = LabelIndex::new();
        for id in iter {
            index.assign(id);
        }
        index
    }
}

impl From<Vec<String>> for LabelIndex {
    fn from(ids: Vec<String>) -> Self {
        ids.iter().map(String::as_str).collect()
    }
}

impl From<LabelIndex> for Vec<String> {
    fn from(index: LabelIndex) -> Self {
        index.ids
    }
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("person registry unavailable: {0}")]
    Unavailable(String),
}

/// Source of the current (id, display name) pairs.
pub trait PersonRegistry {
    /// Distinct persons in a stable enumeration order.
    fn persons(&self) -> Result<Vec<Person>, RegistryError>;

    /// Name of one person, `None` when the id is not registered.
    fn display_name(&self, person_id: &str) -> Result<Option<String>, RegistryError> {
        Ok(self
            .persons()?
            .into_iter()
            .find(|p| p.id == person_id)
            .map(|p| p.name))
    }
}

impl<T: PersonRegistry + ?Sized> PersonRegistry for &T {
    fn persons(&self) -> Result<Vec<Person>, RegistryError> {
        (**self).persons()
    }

    fn display_name(&self, person_id: &str) -> Result<Option<String>, RegistryError> {
        (**self).display_name(person_id)
    }
}

impl PersonRegistry for [Person] {
    fn persons(&self) -> Result<Vec<Person>, RegistryError> {
        Ok(self.to_vec())
    }
}

impl PersonRegistry for Vec<Person> {
    fn persons(&self) -> Result<Vec<Person>, RegistryError> {
        Ok(self.clone())
    }
}

/// Where the recognizer gets its label → name table from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    /// The label index stored with the model; names looked up in the registry.
    #[default]
    Model,
    /// Label `i` is the `i`-th person currently in the registry.
    Registry,
}

impl FromStr for LabelSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(Self::Model),
            "registry" => Ok(Self::Registry),
            other => Err(format!("unknown label source {other:?} (expected model or registry)")),
        }
    }
}

/// Display names in label order.
///
/// With [`LabelSource::Model`] each stored person id is resolved through
/// [`PersonRegistry::display_name`] and falls back to the id itself when the
/// person is gone. A model without a stored index always uses registry order.
pub fn resolve_names(
    source: LabelSource,
    index: Option<&LabelIndex>,
    registry: &dyn PersonRegistry,
) -> Result<Vec<String>, RegistryError> {
    match (source, index) {
        (LabelSource::Model, Some(index)) => index
            .iter()
            .map(|id| Ok(registry.display_name(id)?.unwrap_or_else(|| id.to_string())))
            .collect(),
        (LabelSource::Registry, _) | (LabelSource::Model, None) => {
            Ok(registry.persons()?.into_iter().map(|p| p.name).collect())
        }
    }
}
