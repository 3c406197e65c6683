use crate::error::{RagError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 500;
pub const DEFAULT_TOP_K: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ANN_THRESHOLD: usize = 10_000;

/// Models used for ingestion and answering.
///
/// The same configuration must be used for chunks and questions, otherwise
/// similarity scores compare vectors from different spaces.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub embedding_model: String,
    pub chat_model: String,
    pub embedding_dimension: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl ModelConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = ModelConfig {
            embedding_model: env_or("RAG_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL.to_string())?,
            chat_model: env_or("RAG_CHAT_MODEL", DEFAULT_CHAT_MODEL.to_string())?,
            embedding_dimension: env_or("RAG_EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)?,
        };

        if config.embedding_dimension == 0 {
            return Err(RagError::Config(
                "RAG_EMBEDDING_DIMENSION must be positive".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct RagSettings {
    pub models: ModelConfig,
    /// Upper bound on chunk length, in characters
    pub max_chunk_chars: usize,
    /// How many ranked chunks are handed to the chat model
    pub top_k: usize,
    /// Timeout applied to every external call
    pub request_timeout: Duration,
    /// Tenants with at least this many chunks are searched through the vector index
    pub ann_threshold: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        RagSettings {
            models: ModelConfig::default(),
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            top_k: DEFAULT_TOP_K,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            ann_threshold: DEFAULT_ANN_THRESHOLD,
        }
    }
}

impl RagSettings {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let timeout_secs: u64 = env_or("RAG_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(RagSettings {
            models: ModelConfig::from_env()?,
            max_chunk_chars: env_or("RAG_MAX_CHUNK_CHARS", DEFAULT_MAX_CHUNK_CHARS)?,
            top_k: env_or("RAG_TOP_K", DEFAULT_TOP_K)?,
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
            ann_threshold: env_or("RAG_ANN_THRESHOLD", DEFAULT_ANN_THRESHOLD)?,
        })
    }
}

/// Read and parse an environment variable, falling back to `default` when unset
pub(crate) fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| RagError::Config(format!("Invalid value for {}: {}", key, e))),
        _ => Ok(default),
    }
}

/// Read a required environment variable
pub(crate) fn env_required(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RagError::Config(format!("{} not set", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let value: usize = env_or("GRAPH_RAG_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("GRAPH_RAG_TEST_BAD_NUMBER", "not-a-number");
        let err = env_or::<usize>("GRAPH_RAG_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("GRAPH_RAG_TEST_BAD_NUMBER"));
        env::remove_var("GRAPH_RAG_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_env_required_reports_missing_key() {
        let err = env_required("GRAPH_RAG_TEST_MISSING_KEY").unwrap_err();
        assert!(matches!(err, RagError::Config(msg) if msg.contains("GRAPH_RAG_TEST_MISSING_KEY")));
    }

    #[test]
    fn test_default_settings() {
        let settings = RagSettings::default();
        assert_eq!(settings.max_chunk_chars, 500);
        assert_eq!(settings.top_k, 50);
        assert_eq!(settings.models.embedding_dimension, 768);
    }
}
