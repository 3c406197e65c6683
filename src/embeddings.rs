use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Fail with `DimensionMismatch` unless the vector has `expected` components
    pub fn ensure_dimension(&self, expected: usize, context: impl Into<String>) -> Result<()> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch {
                context: context.into(),
                expected,
                actual: self.values.len(),
            })
        }
    }
}

/// A model that turns text into fixed-dimension vectors
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Name of the configured embedding model
    fn embedding_model(&self) -> &str;

    /// Generate an embedding for one text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for several texts, preserving their order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Check that the model handle resolves
    async fn resolve_embedding_model(&self) -> Result<()>;
}

/// Deterministic, fast embedding for offline/local use.
///
/// Hashes lowercase whitespace-separated tokens into buckets and normalizes
/// the result, so texts sharing words score close to each other.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(dim: usize) -> Self {
        LocalEmbedder { dim: dim.max(8) }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_sync(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            values[idx] += 1.0;
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }

        Embedding { values }
    }
}

impl Embedder for LocalEmbedder {
    fn embedding_model(&self) -> &str {
        "local-hash"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }

    async fn resolve_embedding_model(&self) -> Result<()> {
        Ok(())
    }
}

/// `LocalEmbedder` that can be switched off and counts every request
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct SwitchableEmbedder {
    inner: LocalEmbedder,
    down: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl SwitchableEmbedder {
    pub(crate) fn new(dim: usize) -> Self {
        SwitchableEmbedder {
            inner: LocalEmbedder::new(dim),
            down: Default::default(),
            calls: Default::default(),
        }
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Embedder for SwitchableEmbedder {
    fn embedding_model(&self) -> &str {
        "switchable"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.down.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RagError::ModelUnavailable {
                model: "switchable".to_string(),
                reason: "down".to_string(),
            });
        }
        self.inner.embed(text).await
    }

    async fn resolve_embedding_model(&self) -> Result<()> {
        Ok(())
    }
}
