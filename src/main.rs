//! `recon`: run a reconciliation job from a YAML config.
//!
//! Usage:
//!   recon --config jobs/daily.yaml --out runs/2024-06-30
//!   recon --config jobs/daily.yaml --out runs/x --threads 4 --log-level debug --log-dir logs

use std::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rust_recon::pipeline::{run_job, RunOptions};

/// Config-driven reconciliation of two CSV datasets
#[derive(Parser, Debug)]
#[command(name = "recon", version)]
#[command(about = "Config-driven reconciliation")]
struct Cli {
    /// Path to the YAML job file
    #[arg(long)]
    config: PathBuf,

    /// Output directory (audit.json, and reports when outputs.dir is relative)
    #[arg(long)]
    out: PathBuf,

    /// Worker threads for the engine (defaults to available parallelism)
    #[arg(long)]
    threads: Option<usize>,

    /// Log level or filter directive; RUST_LOG takes precedence when set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the timestamped log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn init_logging(level: &str, log_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    fs::create_dir_all(log_dir)?;
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let log_path = log_dir.join(format!("recon_{ts}.log"));
    let file = File::create(&log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;

    Ok(log_path)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match init_logging(&cli.log_level, &cli.log_dir) {
        Ok(path) => tracing::info!(level = %cli.log_level, file = %path.display(), "logging initialized"),
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    }

    let opts = RunOptions {
        num_threads: cli.threads,
        ..Default::default()
    };

    match run_job(&cli.config, &cli.out, &opts) {
        Ok(summary) => {
            println!(
                "{}: {} rows, {} matched, {} non-matched; reports in {}",
                summary.job,
                summary.metrics.total,
                summary.metrics.matched,
                summary.metrics.non_matched,
                summary.report_dir.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            let mut chain = vec![e.to_string()];
            let mut source = e.source();
            while let Some(cause) = source {
                chain.push(cause.to_string());
                source = cause.source();
            }
            tracing::error!(error = %e, chain = ?chain, "job failed");
            ExitCode::FAILURE
        }
    }
}
