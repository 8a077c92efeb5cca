use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rmdm_generator::{generator_for_entity, publish_daily, GeneratorConfig, DEFAULT_SEED};
use rmdm_master::{handle_event, run_daily, yesterday, AuditLog, EventDisposition, FileEvent, MasterConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rmdm-cli")]
#[command(about = "Retail master data consolidation")]
struct Cli {
    /// Debug-level logging unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write synthetic daily snapshots into the store.
    Generate {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
    /// Consolidate one stored snapshot, as if its upload had just finished.
    Consolidate {
        #[arg(long)]
        file: String,
    },
    /// Print an entity's audit log as JSON lines.
    Audit {
        #[arg(long)]
        entity: String,
    },
    Serve,
    /// Generate and consolidate every entity for one day.
    RunDaily {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = MasterConfig::from_env().context("reading configuration")?;

    match cli.command {
        Commands::Generate { date, entity, seed } => {
            let date = date.unwrap_or_else(yesterday);
            let registry = config.load_registry()?;
            let store = config.open_store();
            let names = match entity {
                Some(name) => vec![name],
                None => registry.names().map(str::to_string).collect(),
            };
            for name in names {
                let Some(generator) = generator_for_entity(&name, GeneratorConfig::for_entity(&name, seed)) else {
                    bail!("no generator for entity `{name}`");
                };
                let published = publish_daily(&store, generator.as_ref(), date)
                    .await
                    .with_context(|| format!("generating {name} for {date}"))?;
                println!(
                    "generated {}: key={} rows={} bytes={}",
                    published.entity, published.key, published.rows, published.bytes
                );
            }
        }
        Commands::Consolidate { file } => {
            let registry = config.load_registry()?;
            let engine = config.build_engine()?;
            let event = FileEvent {
                bucket: Some(config.bucket.clone()),
                name: file,
            };
            let disposition = handle_event(&engine, &registry, &event).await?;
            println!("{}", disposition.status_line());
            if let EventDisposition::Consolidated(report) = &disposition {
                println!("{}", serde_json::to_string_pretty(report)?);
                if report.outcome.is_error() {
                    bail!("consolidation of {} failed", report.source_file);
                }
            }
        }
        Commands::Audit { entity } => {
            let registry = config.load_registry()?;
            if registry.get(&entity).is_none() {
                bail!("unknown entity `{entity}`");
            }
            let store = config.open_store();
            for entry in AuditLog::new(&store).replay(&entity).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Serve => {
            rmdm_web::serve(&config).await?;
        }
        Commands::RunDaily { date } => {
            let date = date.unwrap_or_else(yesterday);
            let registry = Arc::new(config.load_registry()?);
            let engine = Arc::new(config.build_engine()?);
            let runs = run_daily(engine, registry, date, DEFAULT_SEED).await;
            let mut failed = 0;
            for run in &runs {
                match (&run.report, &run.error) {
                    (_, Some(err)) => {
                        failed += 1;
                        println!("{}: generation failed: {err}", run.entity);
                    }
                    (Some(report), None) => {
                        if report.outcome.is_error() {
                            failed += 1;
                        }
                        println!("{}", report.summary());
                    }
                    (None, None) => {}
                }
            }
            if failed > 0 {
                bail!("{failed} of {} entities failed for {date}", runs.len());
            }
        }
    }

    Ok(())
}
