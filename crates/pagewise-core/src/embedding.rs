//! Embedding shapes and vector utilities.
//!
//! Embedding providers are inconsistent about the shape they return for a
//! single input: a flat vector, a batch holding one vector, or deeper
//! single-element nesting. [`RawEmbedding`] accepts any of these and
//! [`normalize_embedding`] reduces it to one flat vector.
//!
//! Also provides the vector helpers used by the index backends:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for little-endian BLOB storage

use serde::{Deserialize, Serialize};

/// An embedding as returned by a provider, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEmbedding {
    Flat(Vec<f64>),
    Nested(Vec<RawEmbedding>),
}

impl From<Vec<f32>> for RawEmbedding {
    fn from(v: Vec<f32>) -> Self {
        RawEmbedding::Flat(v.into_iter().map(f64::from).collect())
    }
}

impl RawEmbedding {
    /// Parse a provider JSON value. Returns `None` for non-numeric shapes.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// Reduce a raw embedding to one flat vector.
///
/// Single-element nesting is unwrapped recursively. Returns `None` when the
/// shape is malformed: an empty vector, a batch with more than one entry,
/// or non-finite components.
///
/// # Example
///
/// ```rust
/// use pagewise_core::embedding::{normalize_embedding, RawEmbedding};
///
/// let raw: RawEmbedding = serde_json::from_str("[[[0.5, 1.0]]]").unwrap();
/// assert_eq!(normalize_embedding(&raw), Some(vec![0.5, 1.0]));
/// ```
pub fn normalize_embedding(raw: &RawEmbedding) -> Option<Vec<f32>> {
    match raw {
        RawEmbedding::Flat(values) => {
            if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
                return None;
            }
            Some(values.iter().map(|&v| v as f32).collect())
        }
        RawEmbedding::Nested(inner) if inner.len() == 1 => normalize_embedding(&inner[0]),
        RawEmbedding::Nested(_) => None,
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
