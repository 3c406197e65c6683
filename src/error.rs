//! Error types for the ingestion and retrieval engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Model unavailable: {model} ({reason})")]
    ModelUnavailable { model: String, reason: String },

    #[error("Embedding model {model} returned no vector")]
    EmptyEmbeddingResult { model: String },

    #[error("Model request failed for {model}: {message}")]
    Provider { model: String, message: String },

    #[error("Graph store write failed: {0}")]
    StoreWrite(String),

    #[error("Graph store read failed: {0}")]
    StoreRead(String),

    #[error("Embedding dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Document {document_id} already belongs to chat {owner}")]
    TenantConflict { document_id: String, owner: String },

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// Whether the failure happened while talking to a model provider
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            RagError::ModelUnavailable { .. }
                | RagError::EmptyEmbeddingResult { .. }
                | RagError::Provider { .. }
        )
    }

    /// Whether the failure happened inside the graph store
    pub fn is_store_error(&self) -> bool {
        matches!(self, RagError::StoreWrite(_) | RagError::StoreRead(_))
    }
}
