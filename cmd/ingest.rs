use clap::{command, Parser};
use rig::providers::openai;
use tracing::info;

use deskbot::init_logging;
use deskbot::knowledge::KnowledgeBase;
use deskbot::loaders;
use deskbot::stores::sqlite::SqliteStore;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Rebuild the knowledge-base vector store from a CSV export"
)]
struct Args {
    /// Path to the knowledge-items CSV
    #[arg(long, default_value = "data/knowledge_items.csv")]
    csv_path: String,

    /// Path to the knowledge-base SQLite database
    #[arg(long, default_value = "data/knowledge.db")]
    db_path: String,

    /// API key for the embeddings provider (can also be set via OPENAI_API_KEY env var)
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Base URL of the OpenAI-compatible embeddings provider
    #[arg(long, env = "EMBEDDINGS_BASE_URL", default_value = "https://api.openai.com/v1")]
    embeddings_base_url: String,

    /// Embedding model
    #[arg(long, env = "EMBEDDING_MODEL", default_value = openai::TEXT_EMBEDDING_3_SMALL)]
    embedding_model: String,

    /// Embedding vector width
    #[arg(long, default_value_t = 1536)]
    embedding_dims: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let args = Args::parse();

    let documents = loaders::csv::load(&args.csv_path)?;

    let client = openai::Client::from_url(&args.openai_api_key, &args.embeddings_base_url);
    let embedding_model = client.embedding_model(&args.embedding_model);

    let store = SqliteStore::new(&args.db_path, args.embedding_dims).await?;
    let mut knowledge = KnowledgeBase::new(store, embedding_model);

    let stored = knowledge.rebuild(documents).await?;
    info!(entries = stored, "Knowledge base rebuilt");

    Ok(())
}
