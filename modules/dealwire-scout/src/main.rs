use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dealwire_checkpoint::{CheckpointStore, FileCheckpointStore, PgCheckpointStore};
use dealwire_common::{CheckpointBackend, Config};
use dealwire_scout::collect::{Collector, RssCollector, SerperNewsCollector};
use dealwire_scout::deliver::{DeliveryBackend, NoopDelivery, WebhookDelivery};
use dealwire_scout::digest::FileArtifactSink;
use dealwire_scout::inference::{
    ClaudeInference, InferenceAnalyzer, InferenceClassifier, InferenceResearcher,
};
use dealwire_scout::stages::HttpDocumentFetcher;
use dealwire_scout::{Orchestrator, PipelineDeps};

#[derive(Parser)]
#[command(name = "dealwire", about = "Daily deal and portfolio news digest")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new digest run
    Run {
        /// Persist the digest but skip delivery
        #[arg(long)]
        dry_run: bool,
        /// Explicit run id (defaults to today's date plus a random suffix)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Continue an interrupted run from its last checkpoint
    Resume {
        run_id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the checkpointed state of a run
    Status { run_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dealwire=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    config.log_redacted();

    let store = open_store(&config).await?;

    let (run_id, resume) = match cli.command {
        Command::Status { run_id } => return print_status(store.as_ref(), &run_id).await,
        Command::Run { dry_run, run_id } => {
            if dry_run {
                config.delivery_enabled = false;
            }
            (run_id.unwrap_or_else(new_run_id), false)
        }
        Command::Resume { run_id, dry_run } => {
            if dry_run {
                config.delivery_enabled = false;
            }
            (run_id, true)
        }
    };

    let config = Arc::new(config);
    let deps = build_deps(&config, store)?;
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(config.clone(), deps, cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight calls settle");
            cancel.cancel();
        }
    });

    info!(run_id = run_id.as_str(), resume, "Dealwire digest starting...");
    match orchestrator.run(&run_id, resume).await {
        Ok(result) => {
            info!("Run complete. {}", result.summary);
            if let Some(artifact) = &result.artifact {
                info!(json = artifact.json.as_str(), markdown = artifact.markdown.as_str(), "Digest written");
            }
            Ok(())
        }
        Err(e) => {
            error!(run_id = run_id.as_str(), error = %e, "Run did not complete");
            std::process::exit(1);
        }
    }
}

fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().format("%Y%m%d"), &suffix[..8])
}

async fn open_store(config: &Config) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match config.checkpoint_backend {
        CheckpointBackend::File => Arc::new(FileCheckpointStore::open(&config.checkpoint_dir).await?),
        CheckpointBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres checkpoint backend")?;
            Arc::new(PgCheckpointStore::connect(url).await?)
        }
    };
    Ok(store)
}

fn build_deps(config: &Config, store: Arc<dyn CheckpointStore>) -> Result<PipelineDeps> {
    let Some(api_key) = config.anthropic_api_key.as_deref() else {
        bail!("ANTHROPIC_API_KEY is required to classify and analyze items");
    };
    let inference = Arc::new(ClaudeInference::new(api_key, &config.anthropic_model)?);

    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    for feed in &config.feeds {
        collectors.push(Arc::new(RssCollector::new(
            &feed.name,
            &feed.url,
            config.max_items_per_feed,
        )?));
    }
    match config.serper_api_key.as_deref() {
        Some(key) => {
            for query in &config.search_queries {
                collectors.push(Arc::new(SerperNewsCollector::new(
                    key,
                    query,
                    config.max_items_per_feed,
                )?));
            }
        }
        None if !config.search_queries.is_empty() => {
            warn!("SERPER_API_KEY not set, skipping search queries");
        }
        None => {}
    }
    info!(collectors = collectors.len(), "Collectors configured");

    let delivery: Arc<dyn DeliveryBackend> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookDelivery::new(url.clone())),
        None => Arc::new(NoopDelivery),
    };

    Ok(PipelineDeps::builder()
        .store(store)
        .collectors(collectors)
        .classifier(Arc::new(InferenceClassifier::new(inference.clone())))
        .fetcher(Arc::new(HttpDocumentFetcher::new()?))
        .analyzer(Arc::new(InferenceAnalyzer::new(inference.clone())))
        .researcher(Arc::new(InferenceResearcher::new(inference)))
        .artifacts(Arc::new(FileArtifactSink::new(config.output_dir.clone())))
        .delivery(delivery)
        .build())
}

async fn print_status(store: &dyn CheckpointStore, run_id: &str) -> Result<()> {
    let Some(state) = store.load(run_id).await? else {
        bail!("No checkpoint found for run {run_id}");
    };
    println!("run:        {}", state.run_id);
    println!("status:     {}", state.status.as_str());
    println!("stage:      {}", state.current_stage);
    println!("started:    {}", state.started_at);
    println!("updated:    {}", state.updated_at);
    for record in state.stage_outputs.values() {
        println!("  done {:<12} at {}", record.stage_name.as_str(), record.completed_at);
    }
    if let Some(failure) = &state.failure {
        println!("failed at {}: {}", failure.stage, failure.reason);
    }
    Ok(())
}
