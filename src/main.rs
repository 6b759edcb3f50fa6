//! Annotation Sync command line
//!
//! # Commands
//!
//! - `sync` - Copy annotations missing from the destination
//! - `list` - Show a store's documents and annotation counts
//! - `plugins` - Show registered connectors and plugin search locations

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annotation_sync::config::Config;
use annotation_sync::coordinates::UnavailableConverter;
use annotation_sync::plugin::{LocationResolver, PluginRegistry};
use annotation_sync::sync::{SyncOrchestrator, SyncReport};

/// Reconcile PDF annotations between document stores.
#[derive(Parser)]
#[command(name = "annotation-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy annotations the source has and the destination lacks
    Sync {
        /// Source location, e.g. pocketbook:/media/reader
        #[arg(short, long)]
        source: String,

        /// Destination location, e.g. mendeley
        #[arg(short, long)]
        destination: String,

        /// Compute deltas without writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// List a store's documents with their annotation counts
    List {
        /// Location to read
        #[arg(short, long)]
        source: String,
    },

    /// Show registered connectors and plugin search locations
    Plugins,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annotation_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env();
    let cli = Cli::parse();

    for dir in &config.plugins.search_dirs {
        tracing::debug!(path = %dir.display(), "Plugin search location");
    }

    let registry = PluginRegistry::install(PluginRegistry::with_builtin_plugins())
        .unwrap_or_else(|_| PluginRegistry::global());
    let resolver = LocationResolver::new(registry);

    match cli.command {
        Commands::Sync {
            source,
            destination,
            dry_run,
        } => {
            let mut orchestrator =
                SyncOrchestrator::new(resolver, Arc::new(UnavailableConverter), config.sync.clone())
                    .with_dry_run(dry_run);
            orchestrator.set_source(&source)?;
            orchestrator.set_destination(&destination)?;

            let token = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, finishing current documents");
                    token.cancel();
                }
            });

            let report = orchestrator.sync().await?;
            print_report(&report, cli.format)?;
            if !report.is_complete() {
                std::process::exit(2);
            }
        }
        Commands::List { source } => list(&resolver, &source, cli.format).await?,
        Commands::Plugins => {
            let registry = resolver.registry();
            println!("Importers:");
            for factory in registry.importers() {
                println!("  {}", factory.name());
            }
            println!("Exporters:");
            for factory in registry.exporters() {
                println!("  {}", factory.name());
            }
            println!("Plugin search locations:");
            for dir in &config.plugins.search_dirs {
                println!("  {}", dir.display());
            }
        }
    }

    Ok(())
}

async fn list(resolver: &LocationResolver, descriptor: &str, format: Format) -> anyhow::Result<()> {
    let importer = resolver
        .resolve_importer(descriptor)
        .with_context(|| format!("No matching connector for location: {}", descriptor))?;
    let library = importer
        .annotated_library()
        .await
        .with_context(|| format!("Failed to read {}", descriptor))?;

    let mut rows = Vec::with_capacity(library.len());
    for document in library.documents() {
        let count = match importer.annotations(document).await {
            Ok(set) => Some(set.len()),
            Err(e) => {
                tracing::warn!(path = %document.full_path().display(), error = %e, "Failed to read annotations");
                None
            }
        };
        rows.push((document.full_path().to_path_buf(), document.filesize(), count));
    }

    match format {
        Format::Json => {
            let json: Vec<_> = rows
                .iter()
                .map(|(path, size, count)| {
                    serde_json::json!({ "path": path, "filesize": size, "annotations": count })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Format::Text => {
            for (path, size, count) in &rows {
                let count = count.map_or_else(|| "?".to_string(), |c| c.to_string());
                println!("{:>5}  {:>10}  {}", count, size, path.display());
            }
            println!("{} documents", rows.len());
        }
    }
    Ok(())
}

fn print_report(report: &SyncReport, format: Format) -> anyhow::Result<()> {
    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verb = if report.dry_run { "would export" } else { "exported" };
    println!("{} -> {}", report.source, report.destination);
    println!(
        "{} matched documents, {} only in source, {} only in destination",
        report.matched,
        report.only_source.len(),
        report.only_destination.len()
    );

    for export in report.exports.iter().filter(|e| e.delta > 0) {
        let count = if report.dry_run { export.delta - export.unconvertible } else { export.written };
        println!("  {} {} annotations to {}", verb, count, export.destination.display());
        if export.unconvertible > 0 {
            println!("    {} could not be converted", export.unconvertible);
        }
    }
    for unreadable in &report.unreadable {
        println!("  unreadable: {}: {}", unreadable.path.display(), unreadable.error);
    }
    for failure in &report.failures {
        println!("  failed: {}: {}", failure.destination.display(), failure.error);
    }
    if report.cancelled {
        println!("cancelled, {} documents skipped", report.skipped);
    }
    Ok(())
}
