//! Operator CLI for the media extraction pipeline.
//!
//! Configuration comes from `MEDIA_*` environment variables (see
//! `PipelineConfig::from_env`); flags override the run-specific parts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use media_extraction::lease::FileLock;
use media_extraction::reconcile::RepairOptions;
use media_extraction::stores::UrlTracker;
use media_extraction::{logging, Orchestrator, PipelineConfig, Property, Reconciler, StorePaths};

#[derive(Parser)]
#[command(name = "media-extract")]
#[command(about = "Extract, deduplicate and audit property photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract images for a JSON list of properties, then reconcile
    Extract {
        /// Property list; defaults to MEDIA_PROPERTIES_FILE
        properties: Option<PathBuf>,
        /// Reprocess everything, ignoring completed state
        #[arg(long)]
        no_resume: bool,
        /// Reprocess completed properties
        #[arg(long)]
        force: bool,
    },

    /// Audit stores against disk
    Reconcile {
        /// Limit the audit to one address
        #[arg(long)]
        address: Option<String>,
        /// Drop manifest entries whose file is missing
        #[arg(long)]
        drop_ghosts: bool,
        /// Delete files no entry references
        #[arg(long)]
        delete_orphans: bool,
    },

    /// Print pipeline statistics as JSON
    Stats,

    /// Forget tracked URLs not seen for this many days
    GcUrls {
        #[arg(long, default_value_t = 90)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing().context("Failed to initialize logging")?;
    let cli = Cli::parse();
    let config = PipelineConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Extract {
            properties,
            no_resume,
            force,
        } => {
            let path = properties
                .or_else(|| config.properties_file.clone())
                .context("No property list given (argument or MEDIA_PROPERTIES_FILE)")?;
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let list: Vec<Property> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            let resume = config.resume && !no_resume;
            let force = config.force || force;
            let orchestrator = Orchestrator::from_config(config, None)?;
            let result = orchestrator.extract_all(&list, resume, force).await?;
            orchestrator.shutdown().await;

            tracing::info!(
                run_id = %result.run_id,
                completed = result.completed,
                failed = result.failed,
                skipped = result.skipped,
                unique = result.unique_images,
                duplicates = result.duplicates,
                "Extraction summary"
            );

            let report = orchestrator.reconciler().reconcile(None)?;
            log_report(&report);
            if !result.is_success() {
                tracing::warn!(failed = result.failed, "Some properties failed; rerun to retry them");
            }
        }

        Commands::Reconcile {
            address,
            drop_ghosts,
            delete_orphans,
        } => {
            let reconciler = Reconciler::new(&config.base_dir)
                .with_lease_options(config.manifest_lease.clone());
            let report = reconciler.reconcile(address.as_deref())?;
            log_report(&report);

            if drop_ghosts || delete_orphans {
                let summary = reconciler
                    .repair(
                        &report,
                        RepairOptions {
                            drop_ghosts,
                            delete_orphans,
                        },
                    )
                    .await?;
                let after = reconciler.reconcile(address.as_deref())?;
                tracing::info!(
                    ghosts_dropped = summary.ghosts_dropped,
                    orphans_deleted = summary.orphans_deleted,
                    quality = after.overall_quality,
                    "Repair complete"
                );
            }
        }

        Commands::Stats => {
            let orchestrator = Orchestrator::from_config(config, None)?;
            let stats = orchestrator.get_statistics()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            orchestrator.shutdown().await;
        }

        Commands::GcUrls { older_than_days } => {
            let paths = StorePaths::new(&config.base_dir);
            let _lease = FileLock::for_manifest(&paths.locks_dir, config.manifest_lease.clone())
                .acquire()
                .await?;
            let mut tracker = UrlTracker::load(&paths.url_tracker)?;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days);
            let removed = tracker.garbage_collect(cutoff);
            tracker.save(&paths.url_tracker)?;
            tracing::info!(removed, remaining = tracker.len(), "URL tracker collected");
        }
    }

    Ok(())
}

fn log_report(report: &media_extraction::ReconciliationReport) {
    tracing::info!(
        entries = report.total_entries,
        files = report.disk_count,
        ghosts = report.ghost_count(),
        orphans = report.orphan_count(),
        mismatches = report.mismatch_count(),
        untracked = report.untracked_urls.len(),
        quality = format!("{:.3}", report.overall_quality),
        healthy = report.is_healthy,
        "Reconciliation"
    );
}
