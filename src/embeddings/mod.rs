// Embeddings module
// Text embedding providers and vector helpers shared by indexing and retrieval

#[cfg(test)]
pub(crate) mod testing;

pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;

pub use ollama::{EmbeddingResult, OllamaClient};

/// Guards against division by zero for all-zero vectors
const NORM_EPSILON: f32 = 1e-8;

/// A text embedding service
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model, recorded with every built index
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Scale a vector to unit L2 length in place. Zero vectors stay zero.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let scale = 1.0 / (norm + NORM_EPSILON);
    for value in vector.iter_mut() {
        *value *= scale;
    }
}

/// Returns a normalized copy of `vector`
#[inline]
pub fn normalized(mut vector: Vec<f32>) -> Vec<f32> {
    normalize(&mut vector);
    vector
}
