// Deterministic embedders for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::Embedder;

/// Embeds every text as the zero vector
pub(crate) struct ZeroEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl Embedder for ZeroEmbedder {
    fn model(&self) -> &str {
        "zero"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimension])
    }
}

/// Bag-of-words embedding: each lowercase word increments one hashed bucket
pub(crate) struct HashingEmbedder {
    pub dimension: usize,
}

impl HashingEmbedder {
    fn bucket(&self, word: &str) -> usize {
        let hash = word
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
        (hash % self.dimension as u64) as usize
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.dimension];
        for word in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            vector[self.bucket(&word.to_ascii_lowercase())] += 1.0;
        }
        Ok(vector)
    }
}

/// Wraps another embedder and counts calls
pub(crate) struct CountingEmbedder<E> {
    pub inner: E,
    pub model: String,
    pub batches: AtomicUsize,
    pub texts: AtomicUsize,
}

impl<E> CountingEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            model: "counting".to_string(),
            batches: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CountingEmbedder<E> {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

/// Fails every request, as an unreachable embedding service would
pub(crate) struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding service unavailable")
    }
}
