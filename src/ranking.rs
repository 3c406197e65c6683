use crate::error::{RagError, Result};
use crate::graph::ChunkRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A chunk scored against a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub chunk_text: String,
    pub score: f32,
    pub document_id: String,
    pub filename: String,
    pub order: usize,
}

impl ScoredChunk {
    pub fn from_record(record: ChunkRecord, score: f32) -> Self {
        ScoredChunk {
            chunk_id: record.id,
            chunk_text: record.text,
            score,
            document_id: record.document_id,
            filename: record.filename,
            order: record.order,
        }
    }
}

/// Cosine similarity of two vectors; 0.0 when either has zero magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Descending by score; equal scores fall back to document id, then chunk order
pub fn compare_ranked(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.order.cmp(&b.order))
}

/// Score every chunk against `query` and keep the best `k`
///
/// Every chunk vector must have the query's length; a different length means
/// the chunk was embedded by another model and fails the whole ranking.
pub fn rank_chunks(query: &[f32], chunks: Vec<ChunkRecord>, k: usize) -> Result<Vec<ScoredChunk>> {
    let mut scored = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk.embedding.len() != query.len() {
            return Err(RagError::DimensionMismatch {
                context: format!("chunk {}", chunk.id),
                expected: query.len(),
                actual: chunk.embedding.len(),
            });
        }
        let score = cosine_similarity(query, &chunk.embedding);
        scored.push(ScoredChunk::from_record(chunk, score));
    }

    scored.sort_by(compare_ranked);
    scored.truncate(k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(document_id: &str, order: usize, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: ChunkRecord::chunk_id(document_id, order),
            document_id: document_id.to_string(),
            chat_id: "c1".to_string(),
            filename: format!("{}.txt", document_id),
            order,
            text: format!("text of {}-{}", document_id, order),
            embedding,
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = [0.3, -1.2, 4.5, 0.01];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        let v = [1.0, 2.0, 3.0];
        let zero = [0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_opposite_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_orders_descending_and_truncates() {
        let query = [1.0, 0.0];
        let chunks = vec![
            record("d1", 0, vec![0.0, 1.0]),
            record("d1", 1, vec![1.0, 0.1]),
            record("d1", 2, vec![1.0, 1.0]),
        ];

        let ranked = rank_chunks(&query, chunks, 2).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d1-1", "d1-2"]);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_rank_k_larger_than_corpus() {
        let ranked = rank_chunks(&[1.0], vec![record("d1", 0, vec![2.0])], 50).unwrap();
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_ties_break_on_document_then_order() {
        let query = [1.0, 0.0];
        let chunks = vec![
            record("d2", 0, vec![1.0, 0.0]),
            record("d1", 3, vec![1.0, 0.0]),
            record("d1", 1, vec![2.0, 0.0]),
        ];

        let ranked = rank_chunks(&query, chunks, 10).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d1-1", "d1-3", "d2-0"]);
    }

    #[test]
    fn test_rank_rejects_dimension_drift() {
        let err = rank_chunks(&[1.0, 0.0], vec![record("d1", 0, vec![1.0, 0.0, 0.0])], 5)
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch { expected: 2, actual: 3, .. }
        ));
    }
}
