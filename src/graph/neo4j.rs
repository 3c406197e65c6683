use super::{ChunkRecord, GraphStats, GraphStore};
use crate::config::{env_or, env_required};
use crate::error::{RagError, Result};
use log::{debug, info};
use neo4rs::{query, Graph, Query, Row};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Configuration for Neo4j
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Neo4jConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Neo4jConfig {
            uri: env_or("NEO4J_URI", "bolt://localhost:7687".to_string())?,
            user: env_or("NEO4J_USER", "neo4j".to_string())?,
            password: env_required("NEO4J_PASSWORD")?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

fn store_error(access: Access, operation: &str, err: impl Display) -> RagError {
    let message = format!("{}: {}", operation, err);
    match access {
        Access::Read => RagError::StoreRead(message),
        Access::Write => RagError::StoreWrite(message),
    }
}

/// Graph store backed by Neo4j
///
/// All values, chunk text included, travel as query parameters; nothing is
/// spliced into the Cypher source.
pub struct Neo4jStore {
    graph: Graph,
    timeout: Duration,
}

impl Neo4jStore {
    /// Connect to Neo4j server
    pub async fn connect(config: &Neo4jConfig, timeout: Duration) -> Result<Self> {
        let connecting = Graph::new(&config.uri, &config.user, &config.password);
        let graph = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| RagError::Timeout {
                operation: "neo4j connect",
                secs: timeout.as_secs(),
            })?
            .map_err(|e| store_error(Access::Read, "connect", e))?;

        info!("Connected to Neo4j at {}", config.uri);
        Ok(Neo4jStore { graph, timeout })
    }

    /// Initialize schema with constraints and indexes
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing Neo4j schema...");

        let statements = [
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
            "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
            "CREATE INDEX chunk_chat_id IF NOT EXISTS FOR (c:Chunk) ON (c.chatId)",
            "CREATE INDEX document_chat_id IF NOT EXISTS FOR (d:Document) ON (d.chatId)",
        ];

        for statement in statements {
            let running = self.graph.run(query(statement));
            self.timed("init schema", running)
                .await?
                .map_err(|e| store_error(Access::Write, "init schema", e))?;
        }

        info!("Schema initialized successfully");
        Ok(())
    }

    async fn timed<T>(&self, operation: &'static str, fut: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RagError::Timeout {
                operation,
                secs: self.timeout.as_secs(),
            })
    }

    /// Execute `q` and collect every returned row
    async fn rows(&self, access: Access, operation: &'static str, q: Query) -> Result<Vec<Row>> {
        let fetching = async {
            let mut stream = self.graph.execute(q).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok::<_, neo4rs::Error>(rows)
        };

        self.timed(operation, fetching)
            .await?
            .map_err(|e| store_error(access, operation, e))
    }

    /// Execute a write that must report a row back
    async fn write_one(&self, operation: &'static str, q: Query) -> Result<Row> {
        self.rows(Access::Write, operation, q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| store_error(Access::Write, operation, "query returned no result"))
    }

    async fn read_count(&self, operation: &'static str, q: Query, column: &str) -> Result<i64> {
        let rows = self.rows(Access::Read, operation, q).await?;
        match rows.first() {
            Some(row) => row
                .get::<i64>(column)
                .map_err(|e| store_error(Access::Read, operation, e)),
            None => Ok(0),
        }
    }
}

fn decode_chunk(row: &Row) -> std::result::Result<ChunkRecord, neo4rs::DeError> {
    let order: i64 = row.get("chunk_order")?;
    let embedding: Vec<f64> = row.get("embedding")?;

    Ok(ChunkRecord {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        chat_id: row.get("chat_id")?,
        filename: row.get("filename")?,
        order: order.max(0) as usize,
        text: row.get("text")?,
        embedding: embedding.into_iter().map(|v| v as f32).collect(),
    })
}

impl GraphStore for Neo4jStore {
    async fn upsert_document(&self, document_id: &str, chat_id: &str) -> Result<()> {
        let q = query(
            "MERGE (d:Document {id: $document_id})
             SET d.chatId = $chat_id
             RETURN d.id AS id",
        )
        .param("document_id", document_id)
        .param("chat_id", chat_id);

        self.write_one("upsert document", q).await?;
        debug!("Upserted document {} in chat {}", document_id, chat_id);
        Ok(())
    }

    async fn document_owner(&self, document_id: &str) -> Result<Option<String>> {
        let q = query("MATCH (d:Document {id: $document_id}) RETURN d.chatId AS chat_id")
            .param("document_id", document_id);

        let rows = self.rows(Access::Read, "document owner", q).await?;
        rows.first()
            .map(|row| row.get::<String>("chat_id"))
            .transpose()
            .map_err(|e| store_error(Access::Read, "document owner", e))
    }

    async fn create_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let embedding: Vec<f64> = chunk.embedding.iter().map(|v| *v as f64).collect();

        let q = query(
            "MATCH (d:Document {id: $document_id})
             WHERE d.chatId = $chat_id
             CREATE (c:Chunk {
                 id: $chunk_id,
                 text: $text,
                 embedding: $embedding,
                 chatId: $chat_id,
                 filename: $filename,
                 order: $order
             })
             CREATE (d)-[:HAS_CHUNK {order: $order}]->(c)
             RETURN c.id AS id",
        )
        .param("document_id", chunk.document_id.as_str())
        .param("chat_id", chunk.chat_id.as_str())
        .param("chunk_id", chunk.id.as_str())
        .param("text", chunk.text.as_str())
        .param("embedding", embedding)
        .param("filename", chunk.filename.as_str())
        .param("order", chunk.order as i64);

        self.write_one("create chunk", q).await?;
        debug!("Stored chunk {}", chunk.id);
        Ok(())
    }

    async fn link_chunk_chain(&self, document_id: &str) -> Result<usize> {
        let q = query(
            "MATCH (d:Document {id: $document_id})-[r:HAS_CHUNK]->(c:Chunk)
             WITH c, r ORDER BY r.order
             WITH collect(c) AS chunks
             UNWIND range(0, size(chunks) - 2) AS i
             WITH chunks[i] AS a, chunks[i + 1] AS b
             CREATE (a)-[:NEXT]->(b)
             RETURN count(*) AS linked",
        )
        .param("document_id", document_id);

        let row = self.write_one("link chunks", q).await?;
        let linked: i64 = row
            .get("linked")
            .map_err(|e| store_error(Access::Write, "link chunks", e))?;
        Ok(linked.max(0) as usize)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let q = query(
            "MATCH (d:Document {id: $document_id})
             OPTIONAL MATCH (d)-[:HAS_CHUNK]->(c:Chunk)
             WITH d, collect(c) AS chunks
             FOREACH (chunk IN chunks | DETACH DELETE chunk)
             DETACH DELETE d
             RETURN size(chunks) AS removed",
        )
        .param("document_id", document_id);

        let rows = self.rows(Access::Write, "delete document", q).await?;
        let removed = match rows.first() {
            Some(row) => row
                .get::<i64>("removed")
                .map_err(|e| store_error(Access::Write, "delete document", e))?,
            None => 0,
        };
        Ok(removed.max(0) as usize)
    }

    async fn chunks_for_chat(&self, chat_id: &str) -> Result<Vec<ChunkRecord>> {
        let q = query(
            "MATCH (d:Document)-[r:HAS_CHUNK]->(c:Chunk)
             WHERE c.chatId = $chat_id AND d.chatId = $chat_id
             RETURN c.id AS id,
                    d.id AS document_id,
                    c.chatId AS chat_id,
                    c.filename AS filename,
                    r.order AS chunk_order,
                    c.text AS text,
                    c.embedding AS embedding",
        )
        .param("chat_id", chat_id);

        let rows = self.rows(Access::Read, "fetch chunks", q).await?;
        rows.iter()
            .map(|row| decode_chunk(row).map_err(|e| store_error(Access::Read, "decode chunk", e)))
            .collect()
    }

    async fn count_chunks(&self, chat_id: &str) -> Result<usize> {
        let q = query("MATCH (c:Chunk {chatId: $chat_id}) RETURN count(c) AS total")
            .param("chat_id", chat_id);

        let total = self.read_count("count chunks", q, "total").await?;
        Ok(total.max(0) as usize)
    }

    async fn ping(&self) -> Result<()> {
        let one = self.read_count("ping", query("RETURN 1 AS ok"), "ok").await?;
        if one == 1 {
            Ok(())
        } else {
            Err(store_error(Access::Read, "ping", "unexpected reply"))
        }
    }

    async fn stats(&self) -> Result<GraphStats> {
        let q = query(
            "OPTIONAL MATCH (d:Document) WITH count(d) AS documents
             OPTIONAL MATCH (c:Chunk) WITH documents, count(c) AS chunks
             OPTIONAL MATCH (:Document)-[h:HAS_CHUNK]->(:Chunk)
             WITH documents, chunks, count(h) AS has_chunk
             OPTIONAL MATCH (:Chunk)-[n:NEXT]->(:Chunk)
             RETURN documents, chunks, has_chunk, count(n) AS next",
        );

        let rows = self.rows(Access::Read, "stats", q).await?;
        let Some(row) = rows.first() else {
            return Ok(GraphStats::default());
        };

        let count = |column: &str| -> Result<u64> {
            row.get::<i64>(column)
                .map(|v| v.max(0) as u64)
                .map_err(|e| store_error(Access::Read, "stats", e))
        };

        Ok(GraphStats {
            document_count: count("documents")?,
            chunk_count: count("chunks")?,
            has_chunk_count: count("has_chunk")?,
            next_count: count("next")?,
        })
    }
}
