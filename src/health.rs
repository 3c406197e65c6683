use crate::embeddings::Embedder;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::synthesis::ChatModel;
use serde::Serialize;

/// Reachability of one model dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyHealth {
    pub ok: bool,
    pub error: String,
}

impl DependencyHealth {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => DependencyHealth {
                ok: true,
                error: String::new(),
            },
            Err(e) => DependencyHealth {
                ok: false,
                error: e.to_string(),
            },
        }
    }
}

/// Status of every external dependency
///
/// `store` and `error` describe the graph store; `ok` is set only when all
/// three dependencies answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub embeddings: DependencyHealth,
    pub chat: DependencyHealth,
    pub store: bool,
    pub error: String,
}

impl HealthReport {
    /// Assemble a report from individual probe results
    pub fn from_probes(embeddings: Result<()>, chat: Result<()>, store: Result<()>) -> Self {
        let embeddings = DependencyHealth::from_result(embeddings);
        let chat = DependencyHealth::from_result(chat);
        let store = DependencyHealth::from_result(store);

        HealthReport {
            ok: embeddings.ok && chat.ok && store.ok,
            embeddings,
            chat,
            store: store.ok,
            error: store.error,
        }
    }
}

/// Probe the embedding model, the chat model and the graph store
///
/// Never fails: every problem is reported inside the returned status.
pub async fn check<E, C, S>(embedder: &E, chat: &C, store: &S) -> HealthReport
where
    E: Embedder,
    C: ChatModel,
    S: GraphStore,
{
    HealthReport::from_probes(
        embedder.resolve_embedding_model().await,
        chat.resolve_chat_model().await,
        store.ping().await,
    )
}
