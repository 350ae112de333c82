//! SQLite roster of students and their enrolled face images.

use rollcall_core::labels::{Person, PersonRegistry, RegistryError};
use rollcall_core::source::{SampleSource, SourceError};
use rollcall_core::Sample;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    msv       TEXT PRIMARY KEY,
    name      TEXT,
    birthdate TEXT,
    class     TEXT
);
CREATE TABLE IF NOT EXISTS face_images (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    msv          TEXT,
    image_number INTEGER,
    image        BLOB
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("student field '{0}' must not be empty")]
    MissingField(&'static str),
    #[error("no student with id {0}")]
    UnknownStudent(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub birthdate: String,
    pub class_name: String,
}

impl Student {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        birthdate: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            birthdate: birthdate.into(),
            class_name: class_name.into(),
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        let fields = [
            ("id", &self.id),
            ("name", &self.name),
            ("birthdate", &self.birthdate),
            ("class", &self.class_name),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(StoreError::MissingField(field));
            }
        }
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            birthdate: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            class_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        })
    }
}

/// One stored face image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    pub id: i64,
    pub student_id: String,
    /// 1-based position among the student's images at insertion time.
    pub image_number: i64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub students: u64,
    pub images: u64,
}

/// Student roster backed by a single SQLite file.
///
/// Also serves as the training [`SampleSource`] and the recognizer's
/// [`PersonRegistry`]. Rows are always returned in insertion order.
pub struct StudentStore {
    conn: Connection,
}

impl StudentStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "student store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a student or replace the one with the same id.
    pub fn upsert_student(&self, student: &Student) -> Result<(), StoreError> {
        student.validate()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO students (msv, name, birthdate, class) VALUES (?1, ?2, ?3, ?4)",
            params![student.id, student.name, student.birthdate, student.class_name],
        )?;
        tracing::info!(id = %student.id, "student saved");
        Ok(())
    }

    /// Delete a student together with all of their face images.
    ///
    /// Returns whether the student existed.
    pub fn remove_student(&self, id: &str) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM students WHERE msv = ?1", params![id])?;
        let images = tx.execute("DELETE FROM face_images WHERE msv = ?1", params![id])?;
        tx.commit()?;
        tracing::info!(id, removed = removed > 0, images, "student removed");
        Ok(removed > 0)
    }

    pub fn student(&self, id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT msv, name, birthdate, class FROM students WHERE msv = ?1",
                params![id],
                Student::from_row,
            )
            .optional()?)
    }

    pub fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT msv, name, birthdate, class FROM students ORDER BY rowid")?;
        let rows = stmt.query_map([], Student::from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Students whose id or name contains `term`.
    pub fn search_students(&self, term: &str) -> Result<Vec<Student>, StoreError> {
        let pattern = format!("%{term}%");
        let mut stmt = self.conn.prepare(
            "SELECT msv, name, birthdate, class FROM students
             WHERE msv LIKE ?1 OR name LIKE ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![pattern], Student::from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Store an encoded image for an existing student.
    ///
    /// Returns the assigned image number (existing count + 1).
    pub fn add_face_image(&self, student_id: &str, bytes: &[u8]) -> Result<i64, StoreError> {
        if self.student(student_id)?.is_none() {
            return Err(StoreError::UnknownStudent(student_id.to_string()));
        }
        let tx = self.conn.unchecked_transaction()?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM face_images WHERE msv = ?1",
            params![student_id],
            |r| r.get(0),
        )?;
        let number = count + 1;
        tx.execute(
            "INSERT INTO face_images (msv, image_number, image) VALUES (?1, ?2, ?3)",
            params![student_id, number, bytes],
        )?;
        tx.commit()?;
        tracing::debug!(id = student_id, number, size = bytes.len(), "face image stored");
        Ok(number)
    }

    pub fn face_images(&self, student_id: &str) -> Result<Vec<FaceImage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, msv, image_number, image FROM face_images WHERE msv = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![student_id], |row| {
            Ok(FaceImage {
                id: row.get(0)?,
                student_id: row.get(1)?,
                image_number: row.get(2)?,
                bytes: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let count = |sql: &str| -> Result<u64, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreCounts {
            students: count("SELECT COUNT(*) FROM students")?,
            images: count("SELECT COUNT(*) FROM face_images")?,
        })
    }

    fn all_samples(&self) -> Result<Vec<Sample>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT msv, image FROM face_images ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok(Sample::new(row.get::<_, String>(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

impl SampleSource for StudentStore {
    fn name(&self) -> &str {
        "store"
    }

    fn samples(&self) -> Result<Vec<Sample>, SourceError> {
        self.all_samples()
            .map_err(|e| SourceError::Store(e.to_string()))
    }
}

impl PersonRegistry for StudentStore {
    fn persons(&self) -> Result<Vec<Person>, RegistryError> {
        let students = self
            .list_students()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        Ok(students
            .into_iter()
            .map(|s| Person {
                id: s.id,
                name: s.name,
            })
            .collect())
    }

    fn display_name(&self, person_id: &str) -> Result<Option<String>, RegistryError> {
        self.student(person_id)
            .map(|s| s.map(|s| s.name))
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }
}
