//! rollcall-store: Student roster and face image storage.
//!
//! Persists students and their enrolled images in SQLite. The store doubles
//! as the training sample source and the recognizer's person registry.

pub mod import;
pub mod store;

pub use import::{is_supported_image, prepare_image, ImportError};
pub use store::{FaceImage, StoreCounts, StoreError, Student, StudentStore};
