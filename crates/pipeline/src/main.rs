use anyhow::{Context, Result};
use clap::Parser;
use extract::PromptTemplates;
use grounding::DocumentReader;
use pipeline::{AppConfig, Pipeline};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Generate validation questions for the claims in a research document.
#[derive(Parser)]
#[command(name = "pipeline", version)]
struct Cli {
    /// Document to analyze (.txt or .md)
    file: PathBuf,

    /// Job identifier; a random one is generated when omitted
    #[arg(long)]
    job_id: Option<String>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of prompt template overrides
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables before anything reads them
    dotenvy::dotenv().ok();

    init_tracing(cli.json_logs);

    let config = AppConfig::load(cli.config.as_deref())?;
    let templates = match &cli.prompts {
        Some(dir) => PromptTemplates::load_dir(dir)?,
        None => PromptTemplates::default(),
    };
    let pipeline = Pipeline::from_config(&config, templates)?;

    let raw = DocumentReader::read_file(&cli.file).await?;
    let job_id = cli
        .job_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let options = config.run_options();
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = pipeline
        .run_with_options(&raw, &job_id, &options)
        .await
        .with_context(|| format!("Pipeline failed for {}", cli.file.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    let snapshot = serde_json::to_string(&pipeline.metrics().snapshot())?;
    info!(job_id = %job_id, metrics = %snapshot, "Run metrics");

    Ok(())
}

fn init_tracing(json: bool) {
    // Logs go to stderr so stdout carries only the report
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
