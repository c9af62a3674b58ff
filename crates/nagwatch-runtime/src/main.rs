//! nagwatch: alert state tracking with nag gating, missing-data detection
//! and wall-clock aligned, grouped notification flushes.

use anyhow::Context;
use clap::Parser;

mod checkpoint;
mod cli;
mod config;
mod daemon;
mod emit;
mod evaluator;
mod ingest;
mod inspect;
mod telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.log_format);

    match args.command {
        cli::Command::Run(opts) => {
            let config = config::AppConfig::load(&opts.config)?;
            let checkpoint = opts.checkpoint.or_else(|| config.checkpoint.path.clone());
            tracing::info!(config = %opts.config.display(), "nagwatch starting");
            if let Some(addr) = config.metrics.listen {
                telemetry::install(addr)?;
            }
            daemon::run_daemon(daemon::RunOptions {
                config,
                input: ingest::InputSource::from_arg(opts.input),
                checkpoint,
            })
            .await?;
        }
        cli::Command::CheckConfig(opts) => {
            let config = config::AppConfig::load(&opts.config)
                .with_context(|| format!("invalid config {}", opts.config.display()))?;
            println!(
                "{}: ok ({} alerts)",
                opts.config.display(),
                config.alerts.len()
            );
        }
        cli::Command::Inspect(opts) => {
            inspect::cmd_inspect(&opts.checkpoint, opts.json)?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries emitted alert groups.
fn init_tracing(format: cli::LogFormat) {
    let filter = std::env::var("NAGWATCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr);
    match format {
        cli::LogFormat::Text => builder.init(),
        cli::LogFormat::Json => builder.json().init(),
    }
}
