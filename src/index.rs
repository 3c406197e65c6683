//! Approximate nearest-neighbour index mirroring chunk vectors
//!
//! The graph store stays the source of truth; the index only answers top-k
//! queries for tenants too large for an exact scan. Every point carries its
//! chat id and searches filter on it. Hits still report the chat they belong
//! to so callers can check ownership again.

use crate::config::env_or;
use crate::error::{RagError, Result};
use crate::graph::ChunkRecord;
use crate::ranking::ScoredChunk;
use log::{debug, info, warn};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// A search hit and the chat named in its payload
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chat_id: String,
    pub chunk: ScoredChunk,
}

/// Vector index kept alongside the graph store
#[allow(async_fn_in_trait)]
pub trait VectorIndex {
    /// Mirror chunk vectors into the index
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()>;

    /// Remove every point of `document_id`
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Top `k` hits of `chat_id` closest to `query`
    async fn search(&self, chat_id: &str, query: &[f32], k: usize) -> Result<Vec<IndexHit>>;
}

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl QdrantConfig {
    /// Create a configuration from environment variables; `None` when `QDRANT_URL` is unset
    pub fn from_env() -> Result<Option<Self>> {
        let Some(url) = env::var("QDRANT_URL").ok().filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(QdrantConfig {
            url,
            api_key: env::var("QDRANT_API_KEY").ok(),
            collection: env_or("QDRANT_COLLECTION", "rag_chunks".to_string())?,
        }))
    }
}

/// Client for the chunk vector index
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
    timeout: Duration,
}

impl QdrantIndex {
    /// Create a new Qdrant client and make sure the collection exists
    pub async fn connect(config: QdrantConfig, dimension: usize, timeout: Duration) -> Result<Self> {
        let builder = Qdrant::from_url(&config.url);
        let builder = if let Some(api_key) = config.api_key {
            builder.api_key(api_key)
        } else {
            builder
        };

        let client = builder
            .build()
            .map_err(|e| RagError::Index(format!("Failed to build Qdrant client: {}", e)))?;

        let index = QdrantIndex {
            client,
            collection: config.collection,
            dimension,
            timeout,
        };
        index.ensure_collection().await?;
        Ok(index)
    }

    async fn timed<T, E: std::fmt::Display>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RagError::Timeout {
                operation,
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| RagError::Index(format!("{} in {}: {}", operation, self.collection, e)))
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .timed("check collection", self.client.collection_exists(self.collection.as_str()))
            .await?;
        if exists {
            return Ok(());
        }

        let create_collection = CreateCollectionBuilder::new(self.collection.clone())
            .vectors_config(VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine));

        self.timed("create collection", self.client.create_collection(create_collection))
            .await?;
        info!("Created vector collection {}", self.collection);
        Ok(())
    }
}

impl VectorIndex for QdrantIndex {
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks
            .iter()
            .map(|chunk| {
                let payload = Payload::try_from(json!({
                    "chunk_id": chunk.id,
                    "document_id": chunk.document_id,
                    "chat_id": chunk.chat_id,
                    "filename": chunk.filename,
                    "order": chunk.order,
                    "text": chunk.text,
                }))
                .map_err(|e| RagError::Index(format!("Invalid payload for {}: {}", chunk.id, e)))?;

                Ok(PointStruct::new(
                    point_id(&chunk.id),
                    chunk.embedding.clone(),
                    payload,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        let upsert_request = UpsertPointsBuilder::new(self.collection.clone(), points).wait(true);
        self.timed("upsert points", self.client.upsert_points(upsert_request))
            .await?;

        debug!("Indexed {} chunks", chunks.len());
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let delete_request = DeletePointsBuilder::new(self.collection.clone())
            .points(Filter::must([Condition::matches(
                "document_id",
                document_id.to_string(),
            )]))
            .wait(true);

        self.timed("delete points", self.client.delete_points(delete_request))
            .await?;
        Ok(())
    }

    async fn search(&self, chat_id: &str, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                context: "index query".to_string(),
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let search_request = SearchPointsBuilder::new(self.collection.clone(), query.to_vec(), k as u64)
            .filter(Filter::must([Condition::matches("chat_id", chat_id.to_string())]))
            .with_payload(true);

        let response = self
            .timed("search points", self.client.search_points(search_request))
            .await?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            match decode_point(point) {
                Some(hit) => hits.push(hit),
                None => warn!("Discarding index hit with incomplete payload"),
            }
        }

        Ok(hits)
    }
}


/// Stable point id derived from the chunk id
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(|s| s.to_string())
}

fn decode_point(point: ScoredPoint) -> Option<IndexHit> {
    let payload = point.payload;
    let chat_id = payload_str(&payload, "chat_id")?;
    let order = payload
        .get("order")
        .and_then(|v| v.as_integer())
        .map(|v| v.max(0) as usize)
        .unwrap_or(0);

    Some(IndexHit {
        chat_id,
        chunk: ScoredChunk {
            chunk_id: payload_str(&payload, "chunk_id")?,
            chunk_text: payload_str(&payload, "text")?,
            score: point.score,
            document_id: payload_str(&payload, "document_id")?,
            filename: payload_str(&payload, "filename").unwrap_or_default(),
            order,
        },
    })
}

/// Exact in-memory index for tests
///
/// `ignoring_chat_filter` builds one that returns hits from every chat, like a
/// misconfigured collection would.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryVectorIndex {
    points: std::sync::Mutex<std::collections::BTreeMap<String, ChunkRecord>>,
    ignore_chat_filter: bool,
    fail_upserts: std::sync::atomic::AtomicBool,
    searches: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryVectorIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ignoring_chat_filter() -> Self {
        MemoryVectorIndex {
            ignore_chat_filter: true,
            ..Self::default()
        }
    }

    pub(crate) fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn searches(&self) -> usize {
        self.searches.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.points.lock().unwrap().len()
    }
}

#[cfg(test)]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        if self.fail_upserts.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RagError::Index("injected upsert failure".to_string()));
        }
        let mut points = self.points.lock().unwrap();
        for chunk in chunks {
            points.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.points
            .lock()
            .unwrap()
            .retain(|_, chunk| chunk.document_id != document_id);
        Ok(())
    }

    async fn search(&self, chat_id: &str, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        use crate::ranking::{compare_ranked, cosine_similarity};

        self.searches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let points = self.points.lock().unwrap();
        let mut hits: Vec<IndexHit> = points
            .values()
            .filter(|chunk| self.ignore_chat_filter || chunk.chat_id == chat_id)
            .map(|chunk| IndexHit {
                chat_id: chunk.chat_id.clone(),
                chunk: ScoredChunk::from_record(
                    chunk.clone(),
                    cosine_similarity(query, &chunk.embedding),
                ),
            })
            .collect();
        hits.sort_by(|a, b| compare_ranked(&a.chunk, &b.chunk));
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable_and_distinct() {
        assert_eq!(point_id("d1-0"), point_id("d1-0"));
        assert_ne!(point_id("d1-0"), point_id("d1-1"));
        assert!(Uuid::parse_str(&point_id("d1-0")).is_ok());
    }

    #[test]
    fn test_decode_point_reads_payload() {
        let payload: HashMap<String, Value> = [
            ("chunk_id", Value::from("d1-2")),
            ("document_id", Value::from("d1")),
            ("chat_id", Value::from("c1")),
            ("filename", Value::from("notes.txt")),
            ("order", Value::from(2i64)),
            ("text", Value::from("He said \"hello\"")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let point = ScoredPoint {
            payload,
            score: 0.75,
            ..Default::default()
        };

        let IndexHit { chat_id, chunk } = decode_point(point).unwrap();
        assert_eq!(chat_id, "c1");
        assert_eq!(chunk.chunk_id, "d1-2");
        assert_eq!(chunk.order, 2);
        assert_eq!(chunk.chunk_text, "He said \"hello\"");
        assert_eq!(chunk.score, 0.75);
    }

    #[test]
    fn test_decode_point_without_chat_is_dropped() {
        let point = ScoredPoint {
            score: 0.5,
            ..Default::default()
        };
        assert!(decode_point(point).is_none());
    }

    #[test]
    fn test_config_absent_without_url() {
        std::env::remove_var("QDRANT_URL");
        assert!(QdrantConfig::from_env().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_index_replaces_and_deletes_by_document() {
        let chunk = |document_id: &str, order: usize| ChunkRecord {
            id: format!("{}-{}", document_id, order),
            document_id: document_id.to_string(),
            chat_id: "c1".to_string(),
            filename: "f.txt".to_string(),
            order,
            text: "text".to_string(),
            embedding: vec![1.0, 0.0],
        };
        let index = MemoryVectorIndex::new();
        index.upsert_chunks(&[chunk("a", 0), chunk("a", 1), chunk("b", 0)]).await.unwrap();
        index.upsert_chunks(&[chunk("a", 0)]).await.unwrap();
        assert_eq!(index.len(), 3);

        index.delete_document("a").await.unwrap();
        let hits = index.search("c1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.document_id, "b");
    }
}
