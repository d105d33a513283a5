use serde::{Deserialize, Serialize};

/// Embedding dimension produced by the ArcFace model.
pub const EMBEDDING_DIM: usize = 512;

/// Cosine similarity at or above which a face counts as recognized.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.68;

/// Added to each norm in [`Embedding::similarity`] so a zero vector never divides by zero.
const SIMILARITY_EPSILON: f64 = 1e-10;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in source-image pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box without landmarks, as produced by detectors that only report rectangles.
    pub fn rect(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self { x, y, width, height, confidence, landmarks: None }
    }

    /// Corner form `[x1, y1, x2, y2]`, truncated to whole pixels.
    pub fn corners(&self) -> [i32; 4] {
        [
            self.x as i32,
            self.y as i32,
            (self.x + self.width) as i32,
            (self.y + self.height) as i32,
        ]
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Values are owned and copied between stages; nothing shares an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
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

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.norm_f64() as f32
    }

    /// Sum of squares accumulated in f64; f32 drifts past 1e-5 on 512 components.
    fn norm_f64(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }

    /// Scale to unit length. A zero vector is returned unchanged.
    pub fn normalize(mut self) -> Self {
        let norm = self.norm_f64();
        if norm > 0.0 {
            let scale = 1.0 / norm;
            for v in &mut self.values {
                *v = (f64::from(*v) * scale) as f32;
            }
        }
        self
    }

    /// Cosine similarity clamped to [0, 1]. Higher = more similar.
    ///
    /// Both sides are re-normalized here, so callers may pass raw vectors.
    /// Anti-correlated and orthogonal embeddings both score 0. Embeddings of
    /// different dimension are never similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = (norm_a.sqrt() + SIMILARITY_EPSILON) * (norm_b.sqrt() + SIMILARITY_EPSILON);
        ((dot / denom) as f32).clamp(0.0, 1.0)
    }
}

/// One member of the gallery. The embedding is always normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub external_id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// Outcome of comparing a probe embedding against a gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchDecision {
    /// Gallery position of the most similar entry, if the gallery was non-empty.
    pub best_index: Option<usize>,
    /// Similarity of that entry in [0, 1]; 0 for an empty gallery.
    pub similarity: f32,
    pub recognized: bool,
}

/// Per-face recognition result.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Matched identity; `None` unless `recognized`.
    pub identity: Option<EnrolledIdentity>,
    pub similarity: f32,
    pub recognized: bool,
    pub bbox: BoundingBox,
}

impl MatchResult {
    pub fn distance(&self) -> f32 {
        1.0 - self.similarity
    }

    /// Similarity when recognized, otherwise 0.
    pub fn confidence(&self) -> f32 {
        if self.recognized { self.similarity } else { 0.0 }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchDecision;
}

/// Cosine similarity matcher.
///
/// Visits every gallery entry. Only a strictly greater similarity replaces the
/// current best, so the earliest entry wins ties. The threshold is inclusive.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchDecision {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let sim = probe.similarity(&identity.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) => MatchDecision {
                best_index: Some(idx),
                similarity: best_sim,
                recognized: best_sim >= threshold,
            },
            None => MatchDecision { best_index: None, similarity: 0.0, recognized: false },
        }
    }
}
