use crate::embeddings::Embedder;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::index::{QdrantIndex, VectorIndex};
use crate::ranking::{rank_chunks, ScoredChunk};
use log::{debug, info, warn};

/// Finds the chunks of one chat most similar to a question
///
/// Only chunks tagged with the requested chat are ever fetched or ranked.
pub struct Retriever<'a, E, S, I = QdrantIndex> {
    embedder: &'a E,
    store: &'a S,
    dimension: usize,
    index: Option<(&'a I, usize)>,
}

impl<'a, E, S> Retriever<'a, E, S> {
    /// Exact-scan retriever expecting vectors of `dimension` components
    pub fn new(embedder: &'a E, store: &'a S, dimension: usize) -> Self {
        Retriever {
            embedder,
            store,
            dimension,
            index: None,
        }
    }
}

impl<'a, E, S, I> Retriever<'a, E, S, I> {
    /// Route chats holding at least `threshold` chunks through `index`
    pub fn with_index<J>(self, index: &'a J, threshold: usize) -> Retriever<'a, E, S, J> {
        Retriever {
            embedder: self.embedder,
            store: self.store,
            dimension: self.dimension,
            index: Some((index, threshold)),
        }
    }
}

impl<'a, E: Embedder, S: GraphStore, I: VectorIndex> Retriever<'a, E, S, I> {
    /// Top `k` chunks of `chat_id` ranked by similarity to `question`
    pub async fn retrieve(&self, question: &str, chat_id: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(question).await?;
        query.ensure_dimension(self.dimension, "question")?;

        if let Some((index, threshold)) = self.index {
            let total = self.store.count_chunks(chat_id).await?;
            if total >= threshold {
                info!(
                    "Chat {} holds {} chunks, searching the vector index",
                    chat_id, total
                );
                let chunks = self.search_index(index, chat_id, &query.values, k).await?;
                if chunks.len() >= k.min(total) {
                    return Ok(chunks);
                }
                warn!(
                    "Vector index returned {} of {} expected chunks for chat {}, falling back to a full scan",
                    chunks.len(),
                    k.min(total),
                    chat_id
                );
            }
        }

        let chunks = self.store.chunks_for_chat(chat_id).await?;
        debug!("Ranking {} chunks of chat {}", chunks.len(), chat_id);
        rank_chunks(&query.values, chunks, k)
    }

    /// Index hits owned by `chat_id`; anything else is dropped
    async fn search_index(
        &self,
        index: &I,
        chat_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let hits = index.search(chat_id, query, k).await?;
        let mut chunks = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.chat_id == chat_id {
                chunks.push(hit.chunk);
            } else {
                warn!(
                    "Discarding index hit {} owned by chat {} while searching chat {}",
                    hit.chunk.chunk_id, hit.chat_id, chat_id
                );
            }
        }
        Ok(chunks)
    }
}
