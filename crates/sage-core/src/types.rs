//! Core types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// A vector embedding.
pub type Vector = Vec<f32>;

/// Embedding model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
}

impl EmbeddingModel {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            dimension,
        }
    }

    pub fn onnx_minilm() -> Self {
        Self::new("onnx", "sentence-transformers/all-MiniLM-L6-v2", 384)
    }
}

/// A unit of retrievable text.
///
/// The source label is only used for logging and is not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub source: String,
    pub content: String,
}

impl Snippet {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }
}

/// One nearest-neighbor hit from the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// A retrieved snippet with its position and distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub index: usize,
    pub distance: f32,
    pub content: String,
}

/// Calculate Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    (a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>()).sqrt()
}

/// Normalize a vector to unit length.
pub fn normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
