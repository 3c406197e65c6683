//! Graph model for ingested documents
//!
//! A `Document` node owns its `Chunk` nodes through `HAS_CHUNK` edges that
//! carry the chunk's position, and consecutive chunks are linked by `NEXT`
//! edges in reading order. Every node is tagged with the chat (tenant) it
//! belongs to; reads are always filtered on that tag.

mod memory;
mod neo4j;

pub use memory::MemoryGraphStore;
pub use neo4j::{Neo4jConfig, Neo4jStore};

use crate::error::Result;
use serde::Serialize;

/// A chunk node together with the data needed to write or rank it
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// `{document_id}-{order}`
    pub id: String,
    pub document_id: String,
    pub chat_id: String,
    pub filename: String,
    /// Position of the chunk inside its document
    pub order: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    /// Build the identifier of the chunk at `order` in `document_id`
    pub fn chunk_id(document_id: &str, order: usize) -> String {
        format!("{}-{}", document_id, order)
    }
}

/// Node and relationship counts
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub document_count: u64,
    pub chunk_count: u64,
    pub has_chunk_count: u64,
    pub next_count: u64,
}

/// Storage for documents, chunks and their relationships
#[allow(async_fn_in_trait)]
pub trait GraphStore {
    /// Create the document node, or retag an existing one with `chat_id`
    async fn upsert_document(&self, document_id: &str, chat_id: &str) -> Result<()>;

    /// Chat that owns `document_id`, if the document exists
    async fn document_owner(&self, document_id: &str) -> Result<Option<String>>;

    /// Create a chunk node and its `HAS_CHUNK` edge from the owning document
    async fn create_chunk(&self, chunk: &ChunkRecord) -> Result<()>;

    /// Link the document's chunks with `NEXT` edges in order; returns the edge count
    async fn link_chunk_chain(&self, document_id: &str) -> Result<usize>;

    /// Delete the document, its chunks and every relationship touching them;
    /// returns the number of chunks removed. A missing document is a no-op.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Every chunk tagged with `chat_id`
    async fn chunks_for_chat(&self, chat_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Number of chunks tagged with `chat_id`
    async fn count_chunks(&self, chat_id: &str) -> Result<usize>;

    /// Run a trivial query to prove the store answers
    async fn ping(&self) -> Result<()>;

    async fn stats(&self) -> Result<GraphStats>;
}
