//! folio-admin: out-of-band maintenance for collection document trees.
//!
//! Verifies stored structures against the relational document graph,
//! rebuilds diverged structures, and shortens fractional keys of
//! collections, pins and stars. Each scope runs in its own short
//! transaction, so the tool is safe against a live database.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use folio_db::{Database, PoolConfig, RetryPolicy};

#[derive(Parser)]
#[command(name = "folio-admin")]
#[command(author, version, about = "Maintenance tasks for folio collection trees")]
#[command(propagate_version = true)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Print reports as JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Run pending migrations before the task
    #[arg(long, global = true)]
    migrate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare stored structures with the document graph (read only)
    Verify {
        /// Only this collection
        #[arg(long, conflicts_with = "team")]
        collection: Option<Uuid>,

        /// Only collections of this team
        #[arg(long)]
        team: Option<Uuid>,
    },

    /// Rebuild structures that diverge from the document graph
    Repair {
        /// Only this collection
        #[arg(long, conflicts_with = "team")]
        collection: Option<Uuid>,

        /// Only collections of this team
        #[arg(long)]
        team: Option<Uuid>,
    },

    /// Reassign short fractional keys, preserving order
    Reindex {
        /// Only collections and pins of this team
        #[arg(long, conflicts_with = "user")]
        team: Option<Uuid>,

        /// Only stars of this user
        #[arg(long)]
        user: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _file_guard = init_logging();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(subsystem = "admin", error = %e, "Maintenance task failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   RUST_LOG    - standard env filter (default: "folio_admin=info,folio_db=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "folio_admin=info,folio_db=info,folio_core=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("folio-admin.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        // Console logs go to stderr; stdout carries the reports.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    };

    info!(
        subsystem = "admin",
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

/// Run the selected task. `Ok(false)` means it finished but left problems
/// behind (verify found issues).
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = PoolConfig::from_env().context("invalid pool configuration")?;
    let retry = RetryPolicy::from_env().context("invalid retry configuration")?;
    let db = Database::connect_with_config(&cli.database_url, config)
        .await
        .context("failed to connect to database")?;
    if cli.migrate {
        db.migrate().await.context("failed to run migrations")?;
    }
    let maintenance = db.maintenance.clone().with_retry_policy(retry);

    match cli.command {
        Commands::Verify { collection, team } => {
            let ids = match collection {
                Some(id) => vec![id],
                None => db.collections.live_ids(team).await?,
            };
            let mut clean = true;
            for id in ids {
                let issues = maintenance.verify_collection(id).await?;
                clean &= issues.is_empty();
                if cli.json {
                    println!(
                        "{}",
                        serde_json::json!({ "collection_id": id, "issues": issues })
                    );
                } else if issues.is_empty() {
                    println!("{}  ok", id);
                } else {
                    println!("{}  {} issue(s)", id, issues.len());
                    for issue in &issues {
                        println!("    {:?}", issue);
                    }
                }
            }
            Ok(clean)
        }
        Commands::Repair { collection, team } => {
            let reports = match collection {
                Some(id) => vec![maintenance.repair_collection(id).await?.outcome],
                None => maintenance.repair_all(team).await?,
            };
            let repaired = reports.iter().filter(|r| r.repaired).count();
            for report in &reports {
                if cli.json {
                    println!("{}", serde_json::to_string(report)?);
                } else if report.repaired {
                    println!(
                        "{}  rebuilt ({} issue(s), {} nodes)",
                        report.collection_id,
                        report.issues.len(),
                        report.node_count
                    );
                }
            }
            if !cli.json {
                println!("{} of {} collection(s) rebuilt", repaired, reports.len());
            }
            Ok(true)
        }
        Commands::Reindex { team, user } => {
            let report = match user {
                Some(user) => folio_db::maintenance::ReindexReport {
                    stars: maintenance.reindex_stars(user).await?,
                    ..Default::default()
                },
                None => maintenance.reindex_all(team).await?,
            };
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "rewrote {} collection, {} pin and {} star key(s)",
                    report.collections, report.pins, report.stars
                );
            }
            Ok(true)
        }
    }
}
