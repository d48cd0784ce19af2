//! Airlock CLI - Command-line interface for the upload gateway

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use airlock_core::{AirlockConfig, Gateway, RequestContext, UploadCandidate};
use airlock_ledger::SledDatastore;
use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "airlock")]
#[command(about = "Airlock - Zero-trust sanitizing gateway for CSV, PDF and image uploads")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config/airlock.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run files through the gateway
    Scan {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Client identity used for rate limiting
        #[arg(long, default_value = "cli")]
        client: String,
    },
    /// Write an accepted artifact to disk
    Fetch {
        /// Artifact id printed by `scan`
        id: String,
        /// Output path (defaults to the generated download name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the audit record of a request
    Audit {
        request_id: String,
    },
    /// Check configuration validity
    Check,
    /// Show ledger counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AirlockConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Some(Commands::Scan { files, client }) => scan(config, &files, &client).await,
        Some(Commands::Fetch { id, output }) => {
            let gateway = Gateway::open(config)?;
            let delivery = gateway.fetch(&id)?;
            let path = output.unwrap_or_else(|| PathBuf::from(&delivery.filename));
            std::fs::write(&path, &delivery.bytes)
                .with_context(|| format!("writing {}", path.display()))?;
            for (name, value) in &delivery.headers {
                println!("{}: {}", name, value);
            }
            println!("Wrote {} bytes to {}", delivery.bytes.len(), path.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Audit { request_id }) => {
            let gateway = Gateway::open(config)?;
            match gateway.audit_record(&request_id)? {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("No audit record for {}", request_id);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Some(Commands::Check) => {
            config.validate()?;
            println!("Configuration OK: {}", cli.config.display());
            println!(
                "  rate limit {}/min, production mode {}",
                config.gateway.rate_limit_per_minute, config.gateway.production_mode
            );
            println!("  image backend {:?}, PDF flatten fallback {}", config.image.backend, config.pdf.flatten_fallback);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Status) => status(&config.storage.db_path),
        None => {
            println!("Airlock v{} - Use --help for commands", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn scan(config: AirlockConfig, files: &[PathBuf], client: &str) -> anyhow::Result<ExitCode> {
    let gateway = Gateway::open(config)?;
    info!(files = files.len(), client, "Scanning files");

    let mut all_accepted = true;
    for path in files {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let outcome = gateway
            .process(&RequestContext::new(client), UploadCandidate::new(filename, bytes))
            .await;
        all_accepted &= outcome.is_accepted();
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    Ok(if all_accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn status(db_path: &Path) -> anyhow::Result<ExitCode> {
    let ledger = SledDatastore::open(db_path)
        .with_context(|| format!("opening ledger at {}", db_path.display()))?;
    let stats = ledger.stats()?;

    println!("Airlock ledger: {}", db_path.display());
    println!("  audits:     {} ({} processing)", stats.audits, stats.processing);
    println!("  sanitized:  {}", stats.sanitized);
    println!("  rejected:   {}", stats.rejected);
    println!("  errors:     {}", stats.errors);
    println!("  reputation: {}", stats.reputation_entries);
    println!("  artifacts:  {}", stats.artifacts);
    Ok(ExitCode::SUCCESS)
}
