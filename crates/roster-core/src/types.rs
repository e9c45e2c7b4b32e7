use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label reserved for faces that match no gallery identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Ledger timestamp format (local wall-clock, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Opaque label naming a known person (gallery file stem).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the reserved `Unknown` sentinel.
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_LABEL
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Scale horizontally by `sx` and vertically by `sy`, keeping confidence.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One face found by a `FaceEncoder`.
#[derive(Debug, Clone)]
pub struct EncodedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Matcher verdict for one face.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Known(Identity),
    Unknown,
}

impl Label {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Label::Known(id) => Some(id),
            Label::Unknown => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(id) => id.fmt(f),
            Label::Unknown => f.write_str(UNKNOWN_LABEL),
        }
    }
}

/// A face located in a frame together with its label.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub bbox: BoundingBox,
    pub label: Label,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub identity: Identity,
    pub timestamp: NaiveDateTime,
}

impl AttendanceEvent {
    pub fn new(identity: Identity, timestamp: NaiveDateTime) -> Self {
        Self { identity, timestamp }
    }
}

/// One leaderboard row. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub rank: usize,
    pub identity: Identity,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_identity_unknown_sentinel() {
        assert!(Identity::new("Unknown").is_unknown());
        assert!(!Identity::new("unknown").is_unknown());
        assert_eq!(Label::Unknown.to_string(), UNKNOWN_LABEL);
        assert_eq!(Label::Known("alice".into()).to_string(), "alice");
    }

    #[test]
    fn test_bbox_scaled() {
        let b = BoundingBox { x: 10.0, y: 20.0, width: 5.0, height: 8.0, confidence: 0.9 };
        let s = b.scaled(4.0, 3.0);
        assert_eq!((s.x, s.y, s.width, s.height), (40.0, 60.0, 20.0, 24.0));
        assert_eq!(s.confidence, 0.9);
    }
}
