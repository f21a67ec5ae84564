//! eav-store CLI - schema bootstrap and diagnostics for the EAV store.

use clap::{Parser, Subcommand};
use eav_store::core::schema::bootstrap_order;
use eav_store::{Config, Database, StoreError};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eav-store")]
#[command(about = "Schema bootstrap and diagnostics for the EAV persistence engine")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "eav.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log per-batch and per-category progress (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every missing table, index, procedure and trigger
    Init,

    /// Show which schema components exist
    Status,

    /// Test the database connection
    HealthCheck,

    /// Print the DDL the bootstrapper would run, in creation order
    Ddl,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), StoreError> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    let mut db = Database::open(config)?;
    if cli.verbose {
        db.set_verbose(true);
    }

    match cli.command {
        Commands::Init => {
            let report = db.initialize().await?;

            if cli.output_json {
                print_json(&report)?;
            } else {
                println!("Bootstrap Results ({}):", db.engine());
                println!("  Created: {}", report.created.len());
                for name in &report.created {
                    println!("    + {}", name);
                }
                println!("  Already present: {}", report.existing.len());
                println!("  Not applicable: {}", report.skipped.len());
                if !report.failed.is_empty() {
                    println!("  Failed: {}", report.failed.len());
                    for failure in &report.failed {
                        println!("    ✗ {}: {}", failure.component, failure.message);
                    }
                }
            }

            if let Some(first) = report.failed.first() {
                return Err(StoreError::bootstrap(
                    first.component.clone(),
                    format!("{} ({} components failed)", first.message, report.failed.len()),
                ));
            }
        }

        Commands::Status => {
            let status = db.schema_status().await?;

            if cli.output_json {
                print_json(&status)?;
            } else {
                println!("Schema Status ({}):", db.engine());
                for component in &status {
                    let marker = match (component.applicable, component.exists) {
                        (false, _) => "-",
                        (true, true) => "✓",
                        (true, false) => "✗",
                    };
                    println!("  {} {} {}", marker, component.kind, component.name);
                }
                let missing = status.iter().filter(|c| c.applicable && !c.exists).count();
                println!("\n  Missing: {}", missing);
            }
        }

        Commands::HealthCheck => {
            let result = db.health_check().await?;

            if cli.output_json {
                print_json(&result)?;
            } else {
                println!("Health Check Results:");
                println!(
                    "  Database ({}): {} ({}ms)",
                    result.engine,
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(StoreError::connectivity(
                    "Health check failed",
                    format!("probing {}", result.engine),
                ));
            }
        }

        Commands::Ddl => {
            for component in bootstrap_order() {
                if !db.is_applicable(&component) {
                    continue;
                }
                if let Some(ddl) = db.ddl_for(&component)? {
                    println!("-- {}\n{}\n", component, ddl.trim_end());
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::Config(format!("cannot render JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn setup_logging(verbose: bool, format: &str) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
