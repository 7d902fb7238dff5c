use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::{Assignment, EventKind};
use grader::config::{GraderAppConfig, LoggingConfig};
use grader::{Grader, MemoryStore, RedisWorker, SubmissionRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grader")]
#[command(about = "Dispatch a submission to the judge worker and grade the result", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge one source file against an assignment and print the graded submission
    Submit {
        /// Assignment definition (TOML)
        #[arg(short, long)]
        assignment: PathBuf,

        /// Student ID recorded on the submission
        #[arg(short, long)]
        student: i32,

        /// Source file to judge
        #[arg(short, long)]
        code: PathBuf,

        /// Language (defaults to the file extension)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Print the effective configuration
    CheckConfig,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn language_of(path: &Path, explicit: Option<String>) -> Result<String> {
    if let Some(language) = explicit {
        return Ok(language);
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("cc" | "cpp" | "cxx") => Ok("cpp".into()),
        Some("py") => Ok("python".into()),
        Some(ext) if !ext.is_empty() => Ok(ext.to_string()),
        _ => bail!(
            "Cannot infer language of {}, pass --language",
            path.display()
        ),
    }
}

async fn submit(
    config: GraderAppConfig,
    assignment_path: &Path,
    student_id: i32,
    code_path: &Path,
    language: Option<String>,
) -> Result<()> {
    let assignment: Assignment = toml::from_str(
        &std::fs::read_to_string(assignment_path)
            .with_context(|| format!("Failed to read {}", assignment_path.display()))?,
    )
    .context("Failed to parse assignment")?;
    let code = std::fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read {}", code_path.display()))?;
    let language = language_of(code_path, language)?;

    let worker = RedisWorker::connect(config.worker.clone())
        .await
        .context("Failed to connect to judge worker")?;
    let store = Arc::new(MemoryStore::new());
    let assignment_id = assignment.id;
    store.put_assignment(assignment);

    let grader = Grader::new(config, store, Arc::new(worker));
    for kind in EventKind::ALL {
        grader.subscribe_fn(*kind, "stdout", |event| {
            println!("{}", serde_json::to_string(event)?);
            Ok(())
        });
    }
    let background = grader.spawn_background_tasks();

    let receipt = grader
        .submit(SubmissionRequest {
            assignment_id,
            student_id,
            language,
            code,
        })
        .await
        .context("Dispatch failed")?;
    info!(submission_id = receipt.submission_id, job_id = %receipt.job, "Waiting for verdict");

    let verdict = grader.await_completion(&receipt.job).await?;
    let submission = grader.submission(receipt.submission_id).await?;
    background.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    println!("{}", serde_json::to_string_pretty(&submission)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GraderAppConfig::load().context("Failed to load config")?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Submit {
            assignment,
            student,
            code,
            language,
        } => submit(config, &assignment, student, &code, language).await,
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
