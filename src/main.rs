use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info, warn};
use std::io::{self, Write};
use std::path::PathBuf;

use graph_rag::config::RagSettings;
use graph_rag::document::Document;
use graph_rag::embeddings::Embedder;
use graph_rag::gemini::{GeminiClient, GeminiConfig};
use graph_rag::graph::{GraphStore, Neo4jConfig, Neo4jStore};
use graph_rag::health::HealthReport;
use graph_rag::index::{QdrantConfig, QdrantIndex};
use graph_rag::synthesis::ChatModel;
use graph_rag::{RagEngine, RagError};

/// Question answering over uploaded documents, backed by a Neo4j chunk graph and Gemini
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and store a document (text or PDF)
    Ingest {
        file_path: PathBuf,
        /// Chat (tenant) the document belongs to
        #[arg(long = "chat")]
        chat_id: String,
        /// Document id; defaults to the file name
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Delete a document and all its chunks
    Erase { document_id: String },
    /// Answer a question, or start an interactive session when none is given
    Ask {
        #[arg(long = "chat")]
        chat_id: String,
        question: Option<String>,
    },
    /// Check the embedding model, the chat model and the graph store
    Health,
    /// Print node and relationship counts
    Stats,
    /// Create constraints and indexes in Neo4j
    InitSchema,
}

type Engine = RagEngine<GeminiClient, GeminiClient, Neo4jStore>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = RagSettings::from_env().context("Invalid RAG settings")?;

    let gemini_config = GeminiConfig::from_env(settings.models.clone(), settings.request_timeout)
        .context("Missing GEMINI_API_KEY")?;
    let gemini = GeminiClient::new(gemini_config).context("Failed to build Gemini client")?;

    let neo4j_config = Neo4jConfig::from_env().context("Missing Neo4j configuration")?;
    let store = match Neo4jStore::connect(&neo4j_config, settings.request_timeout).await {
        Ok(store) => store,
        Err(e) if matches!(args.command, Command::Health) => {
            // Health still reports the models when the store is down
            let report = HealthReport::from_probes(
                gemini.resolve_embedding_model().await,
                gemini.resolve_chat_model().await,
                Err(e),
            );
            print_json(&report)?;
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to connect to Neo4j"),
    };

    let mut engine = RagEngine::new(gemini.clone(), gemini, store, settings.clone());
    if let Some(qdrant_config) = QdrantConfig::from_env()? {
        let index = QdrantIndex::connect(
            qdrant_config,
            settings.models.embedding_dimension,
            settings.request_timeout,
        )
        .await
        .context("Failed to initialize Qdrant index")?;
        engine = engine.with_index(index);
    }

    match args.command {
        Command::Ingest {
            file_path,
            chat_id,
            document_id,
        } => {
            if !file_path.exists() {
                error!("File not found: {}", file_path.display());
                return Err(anyhow::anyhow!("File not found"));
            }

            let mut document = Document::from_file(&file_path).context("Failed to read document")?;
            if let Some(id) = document_id {
                document = document.with_document_id(id);
            }
            info!("Document type: {}", document.mime_type);

            let report = engine
                .ingest(
                    &document.content,
                    &document.document_id,
                    &chat_id,
                    &document.filename,
                )
                .await
                .context("Failed to ingest document")?;
            print_json(&report)?;
        }
        Command::Erase { document_id } => {
            let removed = engine
                .erase(&document_id)
                .await
                .context("Failed to erase document")?;
            if removed == 0 {
                warn!("Document {} not found", document_id);
            }
            println!("Removed {} chunks of {}", removed, document_id);
        }
        Command::Ask { chat_id, question } => match question {
            Some(question) => ask(&engine, &chat_id, &question).await?,
            None => run_query_loop(&engine, &chat_id)
                .await
                .context("Error in query loop")?,
        },
        Command::Health => {
            let report = engine.health_check().await;
            print_json(&report)?;
        }
        Command::Stats => {
            let stats = engine.stats().await.context("Failed to read graph stats")?;
            print_json(&stats)?;
        }
        Command::InitSchema => {
            engine
                .store()
                .init_schema()
                .await
                .context("Failed to create schema")?;
            info!("Schema initialised");
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ask(engine: &Engine, chat_id: &str, question: &str) -> Result<()> {
    let answer = engine
        .answer_question(question, chat_id)
        .await
        .context("Failed to answer question")?;

    if answer.context.is_empty() {
        println!("No relevant information found in this chat's documents.");
    }
    println!("\n{}", answer.answer);
    Ok(())
}

/// Read questions from stdin until `exit`
async fn run_query_loop(engine: &Engine, chat_id: &str) -> Result<()> {
    let chunks = engine.store().count_chunks(chat_id).await?;
    println!(
        "Ready to answer questions about {} chunks in chat {}. Type 'exit' to quit.",
        chunks, chat_id
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("\nYour question: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        if let Err(e) = ask(engine, chat_id, question).await {
            match e.downcast_ref::<RagError>() {
                Some(cause) if cause.is_store_error() => error!("Graph store problem: {:#}", e),
                Some(cause) if cause.is_model_error() => error!("Model problem: {:#}", e),
                _ => error!("{:#}", e),
            }
        }
    }

    Ok(())
}
