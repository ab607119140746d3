use anyhow::Result;
use clap::Parser;
use iam_access_validator::db::seed::seed_from_csv_dir;
use iam_access_validator::db::SqliteIamStore;
use iam_access_validator::knowledge::{ingest_iam_store, Embedder, HashingEmbedder, HttpEmbedder, InMemoryKnowledgeStore};
use iam_access_validator::llm::LlmClient;
use iam_access_validator::{ValidationPipeline, ValidatorConfig};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SAMPLE_REQUESTS: [&str; 3] = [
    "I need access to HR Analyst role in Workday",
    "I need access to Payroll Admin role in Salesforce",
    "I need access to IT Admin role in AzureAD",
];

#[derive(Parser)]
#[command(name = "iam-validator")]
#[command(about = "Validate natural-language access requests against the IAM store")]
struct Args {
    /// Access request to validate (requests are read from stdin, one per line, when omitted)
    request: Option<String>,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the configuration)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory with users.csv, applications.csv and roles.csv to load first
    #[arg(long)]
    seed_dir: Option<PathBuf>,

    /// Run the built-in sample requests
    #[arg(long)]
    samples: bool,

    /// Use the local hashing embedder instead of the embeddings endpoint
    #[arg(long)]
    offline_embeddings: bool,

    /// Print the full request state as JSON instead of the response line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => ValidatorConfig::load(path)?,
        None => ValidatorConfig::from_env()?,
    };
    if let Some(ref db) = args.db {
        config.store.path = db.display().to_string();
    }

    let store = Arc::new(SqliteIamStore::open(&config.store.path)?);
    if let Some(ref dir) = args.seed_dir {
        seed_from_csv_dir(&store, dir)?;
    }

    let embedder: Arc<dyn Embedder> = if args.offline_embeddings {
        Arc::new(HashingEmbedder::default())
    } else {
        Arc::new(HttpEmbedder::new(&config.embedding))
    };
    let knowledge = Arc::new(InMemoryKnowledgeStore::new(embedder));
    if let Err(e) = ingest_iam_store(&store, &knowledge).await {
        warn!("Knowledge ingestion failed, semantic tier will abstain: {}", e);
    }

    let backend = Arc::new(LlmClient::new(&config.llm));
    info!("Using model {} at {}", backend.model(), config.llm.base_url);
    let pipeline = ValidationPipeline::from_config(&config, backend, knowledge, store);

    let requests: Vec<String> = if args.samples {
        SAMPLE_REQUESTS.iter().map(|r| r.to_string()).collect()
    } else if let Some(request) = args.request {
        vec![request]
    } else {
        let mut lines = Vec::new();
        for line in std::io::stdin().lock().lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    };

    for request in &requests {
        if args.json {
            let state = pipeline.run(request).await;
            println!("{}", serde_json::to_string_pretty(&state)?);
        } else {
            println!("{}", pipeline.submit(request).await);
        }
    }

    Ok(())
}
