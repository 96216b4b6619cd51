//! CLI interface for buglink

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::engine::{self, ClassificationEngine};
use crate::feedback::{FeedbackRecord, FeedbackStore};
use crate::index::{Embedder, HttpEmbedder};
use crate::types::{Bug, Feature};

#[derive(Parser)]
#[command(name = "buglink")]
#[command(about = "Link bug reports to feature requests with a feedback-trained LLM classifier", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.toml (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API key for the model and embedding services
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify bugs against candidate features
    Classify {
        /// JSON file with the bug list
        #[arg(long)]
        bugs: PathBuf,
        /// JSON file with the candidate feature list
        #[arg(long)]
        features: PathBuf,
        /// Where to write the results JSON (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply human review decisions to queued bugs
    Review {
        /// JSON file with decisions: [{"bug_id", "decision", "rationale"}]
        #[arg(long)]
        decisions: PathBuf,
    },
    /// List bugs awaiting human review
    Queue,
    /// Export or import feedback history
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommands,
    },
}

#[derive(Subcommand)]
enum FeedbackCommands {
    /// Write the full feedback history as JSON
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Append records from a JSON export
    Import {
        /// JSON file with feedback records
        input: PathBuf,
    },
}

/// A reviewer's decision for one queued bug. A missing or literal "none"
/// decision records the explicit "belongs to no feature" judgment.
#[derive(Debug, Deserialize)]
struct ReviewDecision {
    bug_id: String,
    #[serde(default)]
    decision: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Parse arguments and dispatch
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(key) = cli.api_key {
        config.api.api_key = Some(key);
    }
    config.validate()?;

    match cli.command {
        Commands::Classify {
            bugs,
            features,
            output,
        } => classify(&config, &bugs, &features, output.as_deref()).await,
        Commands::Review { decisions } => review(&config, &decisions).await,
        Commands::Queue => queue(&config).await,
        Commands::Feedback { command } => match command {
            FeedbackCommands::Export { output } => export_feedback(&config, output.as_deref()).await,
            FeedbackCommands::Import { input } => import_feedback(&config, &input).await,
        },
    }
}

async fn classify(
    config: &Config,
    bugs_path: &Path,
    features_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let bugs: Vec<Bug> = read_json(bugs_path)?;
    let features: Vec<Feature> = read_json(features_path)?;
    println!(
        "Classifying {} bugs against {} candidate features",
        bugs.len(),
        features.len()
    );

    let engine = ClassificationEngine::from_config(config).await?;

    let progress = ProgressBar::new(bugs.len() as u64);
    let results = engine
        .classify_batch(&bugs, &features, |_| progress.inc(1))
        .await;
    progress.finish_and_clear();

    let summary = engine::summarize(&results);
    println!(
        "Done: {} accepted, {} low-confidence, {} unresolved",
        summary.accepted, summary.low_confidence, summary.unresolved
    );
    if summary.low_confidence + summary.unresolved > 0 {
        println!("Run `buglink queue` to see bugs awaiting human review.");
    }

    let envelope = serde_json::json!({
        "generated_at": chrono::Utc::now(),
        "summary": summary,
        "results": results,
    });
    write_json_or_stdout(output, &envelope)
}

async fn review(config: &Config, decisions_path: &Path) -> Result<()> {
    let decisions: Vec<ReviewDecision> = read_json(decisions_path)?;
    let store = open_store(config).await?;

    let mut applied = 0;
    for entry in decisions {
        let decision = entry
            .decision
            .filter(|value| !value.eq_ignore_ascii_case("none"));
        let rationale = entry.rationale.unwrap_or_default();
        match store
            .complete_review(&entry.bug_id, decision.clone(), &rationale)
            .await
        {
            Ok(_) => {
                applied += 1;
                println!(
                    "{} -> {}",
                    entry.bug_id,
                    decision.as_deref().unwrap_or("none")
                );
            }
            Err(e) => eprintln!("Skipped {}: {e}", entry.bug_id),
        }
    }

    println!("Applied {applied} review decisions");
    Ok(())
}

async fn queue(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let pending = store.pending_reviews().await?;

    if pending.is_empty() {
        println!("No bugs awaiting review.");
        return Ok(());
    }

    println!("{} bugs awaiting review:", pending.len());
    for review in pending {
        let first_line = review.bug_signature.lines().next().unwrap_or_default();
        println!(
            "  {}: {} (model suggested: {})",
            review.bug_id,
            first_line,
            review.model_suggestion.as_deref().unwrap_or("none"),
        );
    }
    Ok(())
}

async fn export_feedback(config: &Config, output: Option<&Path>) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.all().await?;
    eprintln!("Exporting {} feedback records", records.len());
    write_json_or_stdout(output, &records)
}

async fn import_feedback(config: &Config, input: &Path) -> Result<()> {
    let records: Vec<FeedbackRecord> = read_json(input)?;
    let store = open_store(config).await?;
    let imported = store.import(records).await?;
    println!("Imported {imported} feedback records");
    Ok(())
}

/// Open the feedback store alone, without the model client. Review and
/// queue management must work without an API key.
async fn open_store(config: &Config) -> Result<FeedbackStore> {
    let embedder = build_embedder(config);
    Ok(FeedbackStore::open(&config.store.database_path, embedder).await?)
}

fn build_embedder(config: &Config) -> Option<Arc<dyn Embedder>> {
    if !config.embeddings.enabled {
        return None;
    }
    let api_key = config
        .api
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())?;
    match HttpEmbedder::new(config.embeddings.clone(), api_key) {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            tracing::warn!("Could not initialize embedder: {e}");
            None
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json_or_stdout<T: serde::Serialize>(output: Option<&Path>, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Results written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
