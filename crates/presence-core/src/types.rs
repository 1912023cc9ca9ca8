use serde::{Deserialize, Serialize};

/// Face embedding vector (128-d for dlib-style models, 512-d for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to `other`.
    ///
    /// Embeddings of different dimensionality come from different extraction
    /// methods and are not comparable: the distance is `+inf`.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine distance `1 - cos(theta)` to `other`, in [0, 2].
    ///
    /// `+inf` on a dimension mismatch; `1.0` when either vector is zero.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        let similarity = if denom > 0.0 { dot / denom } else { 0.0 };
        1.0 - similarity.clamp(-1.0, 1.0)
    }
}

/// Integer face region in full-resolution frame coordinates.
///
/// Used as the key of the visible-faces map, hence `Eq + Hash + Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Region {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Multiply every edge by `factor` (undo a downscale before extraction).
    pub fn scaled(&self, factor: u32) -> Self {
        let f = factor as i32;
        Self {
            left: self.left * f,
            top: self.top * f,
            right: self.right * f,
            bottom: self.bottom * f,
        }
    }
}

/// A detected face before embedding extraction.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub region: Region,
    pub score: f32,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// One detected face in one processed frame. Never persisted.
#[derive(Debug, Clone)]
pub struct Probe {
    pub embedding: Embedding,
    pub region: Region,
}

/// An enrolled person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
}

/// Outcome of matching a probe against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Name of the accepted identity; `None` means unknown.
    pub name: Option<String>,
    /// `1 - min(1, distance)`, in [0, 1].
    pub confidence: f32,
    /// Raw distance to the nearest gallery entry (`+inf` for an empty gallery).
    pub distance: f32,
}

impl MatchResult {
    pub const UNKNOWN_LABEL: &'static str = "Unknown";

    pub fn unknown(confidence: f32, distance: f32) -> Self {
        Self { name: None, confidence, distance }
    }

    pub fn is_known(&self) -> bool {
        self.name.is_some()
    }

    /// Display label: the identity's name or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(Self::UNKNOWN_LABEL)
    }
}
