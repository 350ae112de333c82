use serde::{Deserialize, Serialize};

/// Display name reported for faces that are not confidently matched.
pub const UNKNOWN_PERSON: &str = "Unknown";

/// One labeled face image, exactly as ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub person_id: String,
    /// Encoded image (JPEG, PNG, ...). Decoded only at training time.
    pub image_bytes: Vec<u8>,
}

impl Sample {
    pub fn new(person_id: impl Into<String>, image_bytes: Vec<u8>) -> Self {
        Self {
            person_id: person_id.into(),
            image_bytes,
        }
    }
}

/// Rectangle of a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the two rectangles share at least one pixel.
    pub fn overlaps(&self, other: &FaceRegion) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Clip the region to a `width` × `height` image.
    ///
    /// Returns `None` when nothing of the region is left inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let w = self.right().min(width) - x;
        let h = self.bottom().min(height) - y;
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRegion::new(x, y, w, h))
    }
}

/// Raw output of the appearance model for one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Dense label index of the nearest training face, `None` for an empty model.
    pub label: Option<usize>,
    /// Chi-square distance to the nearest training face. Lower is better.
    pub distance: f64,
}

impl Prediction {
    /// What an empty or absent model predicts.
    pub const NONE: Prediction = Prediction {
        label: None,
        distance: f64::MAX,
    };
}

/// One labeled detection produced by the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub region: FaceRegion,
    /// Display name, or [`UNKNOWN_PERSON`].
    pub name: String,
    /// Displayed confidence in [0, 100], rounded to two decimals.
    pub confidence: f64,
}

impl RecognitionResult {
    pub fn unknown(region: FaceRegion) -> Self {
        Self {
            region,
            name: UNKNOWN_PERSON.to_string(),
            confidence: 0.0,
        }
    }
}
