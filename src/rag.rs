use crate::chunking::split_into_chunks;
use crate::config::RagSettings;
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::graph::{ChunkRecord, GraphStats, GraphStore};
use crate::health::{self, HealthReport};
use crate::index::{QdrantIndex, VectorIndex};
use crate::ranking::ScoredChunk;
use crate::retriever::Retriever;
use crate::synthesis::{synthesize, Answer, ChatModel};
use log::{info, warn};
use serde::Serialize;

/// Maximum number of chunk texts sent in one embedding request
pub const EMBED_BATCH_SIZE: usize = 100;

/// Outcome of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub link_count: usize,
    /// Chunks of a previous version of the document that were removed first
    pub replaced_chunks: usize,
    /// Whether the chunk vectors reached the nearest-neighbour index
    pub indexed: bool,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<E, C, S, I = QdrantIndex> {
    embedder: E,
    chat: C,
    store: S,
    index: Option<I>,
    settings: RagSettings,
}

impl<E, C, S> RagEngine<E, C, S> {
    /// Create a new RAG engine
    pub fn new(embedder: E, chat: C, store: S, settings: RagSettings) -> Self {
        RagEngine {
            embedder,
            chat,
            store,
            index: None,
            settings,
        }
    }
}

impl<E, C, S, I> RagEngine<E, C, S, I> {
    /// Mirror chunk vectors into `index` and use it for large chats
    pub fn with_index<J: VectorIndex>(self, index: J) -> RagEngine<E, C, S, J> {
        RagEngine {
            embedder: self.embedder,
            chat: self.chat,
            store: self.store,
            index: Some(index),
            settings: self.settings,
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<E, C, S, I> RagEngine<E, C, S, I>
where
    E: Embedder,
    C: ChatModel,
    S: GraphStore,
    I: VectorIndex,
{
    /// Chunk `text`, embed every chunk and store the document graph under `chat_id`
    ///
    /// Every chunk is embedded before anything is written, so a model failure
    /// leaves an existing version of the document untouched. An existing
    /// document with the same id in the same chat is then replaced. A store
    /// failure part way through leaves the chunks written so far in place.
    pub async fn ingest(
        &self,
        text: &str,
        document_id: &str,
        chat_id: &str,
        filename: &str,
    ) -> Result<IngestReport> {
        if let Some(owner) = self.store.document_owner(document_id).await? {
            if owner != chat_id {
                return Err(RagError::TenantConflict {
                    document_id: document_id.to_string(),
                    owner,
                });
            }
        }

        let pieces = split_into_chunks(text, self.settings.max_chunk_chars);
        info!("Split {} into {} chunks", document_id, pieces.len());
        let records = self
            .embed_chunks(&pieces, document_id, chat_id, filename)
            .await?;

        let replaced_chunks = self.erase(document_id).await?;
        if replaced_chunks > 0 {
            warn!(
                "Replacing {} existing chunks of document {}",
                replaced_chunks, document_id
            );
        }

        self.store.upsert_document(document_id, chat_id).await?;
        for record in &records {
            self.store.create_chunk(record).await?;
        }

        let link_count = self.store.link_chunk_chain(document_id).await?;
        let expected_links = records.len().saturating_sub(1);
        if link_count != expected_links {
            return Err(RagError::StoreWrite(format!(
                "linked {} of {} chunk pairs for document {}",
                link_count, expected_links, document_id
            )));
        }

        let indexed = match &self.index {
            Some(index) => match index.upsert_chunks(&records).await {
                Ok(()) => true,
                Err(e) => {
                    // Retrieval falls back to the graph when the index comes up short
                    warn!("Failed to index document {}: {}", document_id, e);
                    false
                }
            },
            None => false,
        };

        info!(
            "Ingested document {} into chat {}: {} chunks",
            document_id,
            chat_id,
            records.len()
        );

        Ok(IngestReport {
            document_id: document_id.to_string(),
            chunk_count: records.len(),
            link_count,
            replaced_chunks,
            indexed,
        })
    }

    /// Embed `pieces` in provider batches and check every vector's length
    async fn embed_chunks(
        &self,
        pieces: &[&str],
        document_id: &str,
        chat_id: &str,
        filename: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let dimension = self.settings.models.embedding_dimension;
        let mut records = Vec::with_capacity(pieces.len());

        for (batch_no, batch) in pieces.chunks(EMBED_BATCH_SIZE).enumerate() {
            let embeddings = self.embedder.embed_batch(batch).await?;
            if embeddings.len() != batch.len() {
                return Err(RagError::EmptyEmbeddingResult {
                    model: self.embedder.embedding_model().to_string(),
                });
            }

            for (offset, (piece, embedding)) in batch.iter().zip(embeddings).enumerate() {
                let order = batch_no * EMBED_BATCH_SIZE + offset;
                let id = ChunkRecord::chunk_id(document_id, order);
                embedding.ensure_dimension(dimension, format!("chunk {}", id))?;

                records.push(ChunkRecord {
                    id,
                    document_id: document_id.to_string(),
                    chat_id: chat_id.to_string(),
                    filename: filename.to_string(),
                    order,
                    text: piece.to_string(),
                    embedding: embedding.values,
                });
            }
        }

        Ok(records)
    }

    /// Delete a document with all its chunks; returns the number of chunks removed
    pub async fn erase(&self, document_id: &str) -> Result<usize> {
        let removed = self.store.delete_document(document_id).await?;

        if let Some(index) = &self.index {
            index.delete_document(document_id).await?;
        }

        if removed > 0 {
            info!("Erased document {} ({} chunks)", document_id, removed);
        }
        Ok(removed)
    }

    /// Chunks of `chat_id` most relevant to `question`, best first
    pub async fn retrieve(&self, question: &str, chat_id: &str) -> Result<Vec<ScoredChunk>> {
        let retriever = Retriever::new(
            &self.embedder,
            &self.store,
            self.settings.models.embedding_dimension,
        );
        let k = self.settings.top_k;

        match &self.index {
            Some(index) => {
                retriever
                    .with_index(index, self.settings.ann_threshold)
                    .retrieve(question, chat_id, k)
                    .await
            }
            None => retriever.retrieve(question, chat_id, k).await,
        }
    }

    /// Answer `question` from the documents of `chat_id`
    pub async fn answer_question(&self, question: &str, chat_id: &str) -> Result<Answer> {
        let context = self.retrieve(question, chat_id).await?;
        info!(
            "Answering question in chat {} with {} context chunks",
            chat_id,
            context.len()
        );
        synthesize(&self.chat, question, context).await
    }

    pub async fn health_check(&self) -> HealthReport {
        health::check(&self.embedder, &self.chat, &self.store).await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        self.store.stats().await
    }
}
