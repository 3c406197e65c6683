pub mod chunking;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod graph;
pub mod health;
pub mod index;
pub mod rag;
pub mod ranking;
pub mod retriever;
pub mod synthesis;

pub use error::{RagError, Result};
pub use rag::{IngestReport, RagEngine};
