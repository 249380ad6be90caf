//! Command-line entry point: batch prediction, knowledge ingestion and
//! single-question routing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vimcq::dataset::{load_questions, write_predictions};
use vimcq::{
    client_for, EmbeddingRetriever, EmptyRetriever, Error, Ingestor, KnowledgeStore, LLMClient,
    Pipeline, PipelineConfig, Question, Result, Retriever, Router, Settings, TrackedClient,
};

#[derive(Parser)]
#[command(
    name = "vimcq",
    version,
    about = "Route and answer Vietnamese multiple-choice questions"
)]
struct Cli {
    /// Pipeline tuning file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer every question in a CSV or JSON file and write `id,answer` CSV.
    Run {
        /// Questions file (defaults to private_test.csv, then public_test.csv)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Predictions file (defaults to pred.csv in the output dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Knowledge files to ingest first (glob patterns)
        #[arg(short, long)]
        knowledge: Vec<String>,
        /// Re-embed the knowledge base even if unchanged.
        #[arg(long)]
        force_reingest: bool,
    },
    /// Ingest knowledge files into the store.
    Ingest {
        /// Re-embed even if unchanged.
        #[arg(short, long)]
        force: bool,
        /// Glob patterns (defaults to knowledge_base.txt in the input dir)
        patterns: Vec<String>,
    },
    /// Print the route chosen for one question.
    Classify {
        #[arg(short, long)]
        question: String,
        /// Choice text, repeat once per choice
        #[arg(short, long = "choice", required = true)]
        choices: Vec<String>,
    },
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env()?;
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    settings.apply_to(&mut config);

    let client = Arc::new(TrackedClient::new(client_for(
        settings.provider,
        settings.client_config()?,
    )?));

    match cli.command {
        Command::Run {
            input,
            output,
            knowledge,
            force_reingest,
        } => {
            let input = input.unwrap_or_else(|| settings.default_input());
            let output = output.unwrap_or_else(|| settings.default_output());
            let questions = load_questions(&input)?;

            let retriever = prepare_knowledge(&settings, client.clone(), knowledge, force_reingest).await?;
            let pipeline = Pipeline::builder(client.clone())
                .retriever(retriever)
                .config(config)
                .build();

            let report = pipeline.run_batch(&questions).await;
            write_predictions(&output, &report.predictions)?;

            let costs = client.get_costs().await;
            println!("{}", report);
            println!(
                "  tokens     {} in / {} out over {} requests",
                costs.total_input_tokens, costs.total_output_tokens, costs.request_count
            );
            println!("Predictions saved to {}", output.display());
        }
        Command::Ingest { force, patterns } => {
            let patterns = if patterns.is_empty() {
                vec![settings.default_knowledge_pattern()]
            } else {
                patterns
            };
            let store = KnowledgeStore::open(&settings.knowledge_db)?;
            let report = Ingestor::new(client, store, settings.ingest_config())
                .ingest(&patterns, force)
                .await?;
            if report.skipped {
                println!("Collection '{}' is up to date ({} chunks)", report.collection, report.chunks);
            } else {
                println!(
                    "Ingested {} chunks from {} files into collection '{}'",
                    report.chunks,
                    report.files.len(),
                    report.collection
                );
            }
        }
        Command::Classify { question, choices } => {
            let question = Question::new("cli", question, choices)?;
            let decision = Router::with_config(client, config.router)
                .classify(&question)
                .await;
            println!("{} ({:?})", decision.route, decision.source);
        }
    }

    Ok(())
}

/// Ingest knowledge if any is available and build the retriever.
///
/// Explicit patterns must ingest successfully. Without them the default
/// knowledge file is used when present, and an existing collection is
/// reused otherwise.
async fn prepare_knowledge(
    settings: &Settings,
    client: Arc<TrackedClient>,
    patterns: Vec<String>,
    force: bool,
) -> Result<Arc<dyn Retriever>> {
    let explicit = !patterns.is_empty();
    let patterns = if explicit {
        patterns
    } else {
        vec![settings.default_knowledge_pattern()]
    };

    let store = KnowledgeStore::open(&settings.knowledge_db)?;
    let ingestor = Ingestor::new(client.clone(), store.clone(), settings.ingest_config());
    match ingestor.ingest(&patterns, force).await {
        Ok(report) => info!(chunks = report.chunks, skipped = report.skipped, "knowledge base ready"),
        Err(Error::Config(reason)) if !explicit => warn!(%reason, "no knowledge files to ingest"),
        Err(e) => return Err(e),
    }

    if store.chunk_count(&settings.collection)? == 0 {
        warn!("knowledge base is empty, knowledge questions will be answered without context");
        return Ok(Arc::new(EmptyRetriever));
    }

    let client: Arc<dyn LLMClient> = client;
    Ok(Arc::new(
        EmbeddingRetriever::new(client, store, settings.collection.clone())
            .with_embedding_model(settings.embedding_model.clone()),
    ))
}
