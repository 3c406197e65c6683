use super::{ChunkRecord, GraphStats, GraphStore};
use crate::error::{RagError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct DocumentNode {
    chat_id: String,
}

#[derive(Debug, Clone, PartialEq)]
struct HasChunkEdge {
    document_id: String,
    chunk_id: String,
    order: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct NextEdge {
    from: String,
    to: String,
}

#[derive(Debug, Default)]
struct GraphState {
    documents: BTreeMap<String, DocumentNode>,
    chunks: BTreeMap<String, ChunkRecord>,
    has_chunk: Vec<HasChunkEdge>,
    next: Vec<NextEdge>,
    /// Chunk writes still allowed before `create_chunk` starts failing
    writes_left: Option<usize>,
    offline: bool,
}

/// Graph store kept in process memory
///
/// Nodes and edges are held explicitly so tests can check the shape of the
/// graph an ingestion produced. Write failures and outages can be injected.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Let `writes` more chunk writes succeed, then fail every following one
    pub fn fail_chunk_writes_after(&self, writes: usize) {
        self.state().writes_left = Some(writes);
    }

    /// Make every operation fail as if the server were down
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Chunk ids of `document_id` linked by `NEXT`, in chain order
    pub fn chain(&self, document_id: &str) -> Vec<String> {
        let state = self.state();
        let Some(first) = state
            .has_chunk
            .iter()
            .filter(|e| e.document_id == document_id)
            .min_by_key(|e| e.order)
        else {
            return Vec::new();
        };

        let mut chain = vec![first.chunk_id.clone()];
        while let Some(edge) = state.next.iter().find(|e| Some(&e.from) == chain.last()) {
            if chain.contains(&edge.to) {
                break;
            }
            chain.push(edge.to.clone());
        }
        chain
    }

    /// `HAS_CHUNK` order values of `document_id`, as stored on the edges
    pub fn has_chunk_orders(&self, document_id: &str) -> Vec<usize> {
        let mut orders: Vec<usize> = self
            .state()
            .has_chunk
            .iter()
            .filter(|e| e.document_id == document_id)
            .map(|e| e.order)
            .collect();
        orders.sort_unstable();
        orders
    }

    /// Chunks whose edges point at a document other than their own, or at none
    pub fn dangling_chunks(&self) -> Vec<String> {
        let state = self.state();
        state
            .chunks
            .values()
            .filter(|chunk| {
                let owners: Vec<&HasChunkEdge> = state
                    .has_chunk
                    .iter()
                    .filter(|e| e.chunk_id == chunk.id)
                    .collect();
                owners.len() != 1
                    || state
                        .documents
                        .get(&owners[0].document_id)
                        .map_or(true, |doc| doc.chat_id != chunk.chat_id)
            })
            .map(|chunk| chunk.id.clone())
            .collect()
    }

    fn check_online(state: &GraphState, read: bool) -> Result<()> {
        if !state.offline {
            return Ok(());
        }
        let message = "in-memory graph is offline".to_string();
        Err(if read {
            RagError::StoreRead(message)
        } else {
            RagError::StoreWrite(message)
        })
    }
}

impl GraphStore for MemoryGraphStore {
    async fn upsert_document(&self, document_id: &str, chat_id: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_online(&state, false)?;
        state.documents.insert(
            document_id.to_string(),
            DocumentNode {
                chat_id: chat_id.to_string(),
            },
        );
        Ok(())
    }

    async fn document_owner(&self, document_id: &str) -> Result<Option<String>> {
        let state = self.state();
        Self::check_online(&state, true)?;
        Ok(state.documents.get(document_id).map(|d| d.chat_id.clone()))
    }

    async fn create_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let mut state = self.state();
        Self::check_online(&state, false)?;

        if let Some(left) = state.writes_left {
            if left == 0 {
                return Err(RagError::StoreWrite(format!(
                    "injected failure writing chunk {}",
                    chunk.id
                )));
            }
            state.writes_left = Some(left - 1);
        }

        match state.documents.get(&chunk.document_id) {
            Some(doc) if doc.chat_id == chunk.chat_id => {}
            Some(_) => {
                return Err(RagError::StoreWrite(format!(
                    "chunk {} is tagged with a different chat than its document",
                    chunk.id
                )))
            }
            None => {
                return Err(RagError::StoreWrite(format!(
                    "document {} not found for chunk {}",
                    chunk.document_id, chunk.id
                )))
            }
        }

        state.chunks.insert(chunk.id.clone(), chunk.clone());
        state.has_chunk.push(HasChunkEdge {
            document_id: chunk.document_id.clone(),
            chunk_id: chunk.id.clone(),
            order: chunk.order,
        });
        debug!("Stored chunk {}", chunk.id);
        Ok(())
    }

    async fn link_chunk_chain(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state();
        Self::check_online(&state, false)?;

        let mut members: Vec<(usize, String)> = state
            .has_chunk
            .iter()
            .filter(|e| e.document_id == document_id)
            .map(|e| (e.order, e.chunk_id.clone()))
            .collect();
        members.sort();

        let links: Vec<NextEdge> = members
            .windows(2)
            .map(|pair| NextEdge {
                from: pair[0].1.clone(),
                to: pair[1].1.clone(),
            })
            .collect();
        let linked = links.len();
        state.next.extend(links);
        Ok(linked)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state();
        Self::check_online(&state, false)?;

        if state.documents.remove(document_id).is_none() {
            return Ok(0);
        }

        let owned: Vec<String> = state
            .has_chunk
            .iter()
            .filter(|e| e.document_id == document_id)
            .map(|e| e.chunk_id.clone())
            .collect();

        for chunk_id in &owned {
            state.chunks.remove(chunk_id);
        }
        state.has_chunk.retain(|e| e.document_id != document_id);
        state
            .next
            .retain(|e| !owned.contains(&e.from) && !owned.contains(&e.to));

        Ok(owned.len())
    }

    async fn chunks_for_chat(&self, chat_id: &str) -> Result<Vec<ChunkRecord>> {
        let state = self.state();
        Self::check_online(&state, true)?;
        Ok(state
            .chunks
            .values()
            .filter(|c| c.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn count_chunks(&self, chat_id: &str) -> Result<usize> {
        let state = self.state();
        Self::check_online(&state, true)?;
        Ok(state.chunks.values().filter(|c| c.chat_id == chat_id).count())
    }

    async fn ping(&self) -> Result<()> {
        Self::check_online(&self.state(), true)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let state = self.state();
        Self::check_online(&state, true)?;
        Ok(GraphStats {
            document_count: state.documents.len() as u64,
            chunk_count: state.chunks.len() as u64,
            has_chunk_count: state.has_chunk.len() as u64,
            next_count: state.next.len() as u64,
        })
    }
}
