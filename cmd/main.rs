use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{command, Parser};
use rig::providers::openai;

use deskbot::agent::Agent;
use deskbot::character::Character;
use deskbot::clients::web::WebClient;
use deskbot::history::ChatHistory;
use deskbot::init_logging;
use deskbot::knowledge::{KnowledgeBase, DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};
use deskbot::stores::sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to character profile TOML file
    #[arg(long, default_value = "src/characters/helpdesk.toml")]
    character: String,

    /// Path to the knowledge-base SQLite database
    #[arg(long, default_value = "data/knowledge.db")]
    db_path: String,

    /// Path to the conversation history JSON file
    #[arg(long, default_value = "data/chat_data.json")]
    history_path: String,

    /// Directory holding the static chat page
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Address to bind the web client to
    #[arg(long, default_value = "0.0.0.0:5000")]
    listen_addr: SocketAddr,

    /// API key for the chat-completions provider (can also be set via GROQ_API_KEY env var)
    #[arg(long, env = "GROQ_API_KEY")]
    groq_api_key: String,

    /// Base URL of the OpenAI-compatible chat-completions provider
    #[arg(long, env = "GROQ_BASE_URL", default_value = "https://api.groq.com/openai/v1")]
    groq_base_url: String,

    /// Chat completion model
    #[arg(long, env = "COMPLETION_MODEL", default_value = "llama-3.3-70b-versatile")]
    completion_model: String,

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

    /// Knowledge entries fetched per query
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Cosine-similarity cutoff for retrieved entries
    #[arg(long, default_value_t = DEFAULT_MIN_SIMILARITY)]
    min_similarity: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let args = Args::parse();

    let character = Character::load(&args.character)?;

    let embeddings_client = openai::Client::from_url(&args.openai_api_key, &args.embeddings_base_url);
    let embedding_model = embeddings_client.embedding_model(&args.embedding_model);

    let completions_client = openai::Client::from_url(&args.groq_api_key, &args.groq_base_url);
    let completion_model = completions_client.completion_model(&args.completion_model);

    let store = SqliteStore::new(&args.db_path, args.embedding_dims).await?;
    let knowledge = KnowledgeBase::new(store, embedding_model);
    let history = ChatHistory::new(&args.history_path);

    let agent = Agent::new(character, completion_model, knowledge, history)
        .with_retrieval(args.top_k, args.min_similarity);

    WebClient::new(agent, args.static_dir)
        .start(args.listen_addr)
        .await
}
