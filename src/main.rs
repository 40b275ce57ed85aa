//! Huntsman — OSINT reconnaissance engine
//!
//! Command-line scan host: validates the target, resolves the module plan,
//! runs the dispatch engine, and prints the aggregated summary as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Scan a domain with the built-in modules
//! huntsman example.com
//!
//! # Durable storage and custom limits
//! huntsman example.com --data-dir ./data --workers 8 --timeout 600
//! ```
//!
//! # Exit codes
//!
//! - `0` scan finished
//! - `1` runtime error (including aborted scans)
//! - `2` invalid target or configuration
//! - `3` unsatisfied or circular module dependencies

use anyhow::{Context, Result};
use clap::Parser;
use huntsman::config::{self, ScanConfig};
use huntsman::engine::{self, EngineError, ScanEngine, ScanStatus};
use huntsman::modules;
use huntsman::resolver::{scan_descriptor_dir, ModuleResolver};
use huntsman::storage::{InMemoryRepository, ScanRepository, SledRepository};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "huntsman")]
#[command(about = "Huntsman OSINT Reconnaissance Engine")]
#[command(version)]
struct CliArgs {
    /// Seed target: domain, IP address, netblock, email, or phone number
    target: String,

    /// Scan identifier (generated when omitted)
    #[arg(long)]
    scan_id: Option<String>,

    /// Path to a TOML scan configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of module descriptor manifests (htm_*.toml)
    #[arg(long, default_value = "./modules")]
    modules_dir: PathBuf,

    /// Persist scan data under this directory instead of in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Worker pool size (default: logical CPUs, capped)
    #[arg(long)]
    workers: Option<usize>,

    /// Overall scan budget in seconds (0 disables)
    #[arg(long)]
    timeout: Option<u64>,

    /// Scan queue capacity
    #[arg(long)]
    capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(error) => {
            error!(error = %error, "Scan host failed");
            ExitCode::from(1)
        }
    }
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    // Configuration
    let mut scan_config = match &args.config {
        Some(path) => match ScanConfig::load(path) {
            Ok(config) => config,
            Err(error) => {
                error!(path = %path.display(), error = %error, "Invalid configuration");
                return Ok(ExitCode::from(2));
            }
        },
        None => ScanConfig::default(),
    };
    if let Some(workers) = args.workers {
        scan_config.max_workers = workers;
    }
    if let Some(timeout) = args.timeout {
        scan_config.scan_timeout_secs = timeout;
    }
    if let Some(capacity) = args.capacity {
        scan_config.queue_capacity = capacity;
    }
    config::init(scan_config.clone());

    // Module plan
    let mut resolver = ModuleResolver::new();
    resolver.register_many(modules::builtin_descriptors());
    let external = scan_descriptor_dir(&mut resolver, &args.modules_dir, "htm");
    if external > 0 {
        info!(count = external, dir = %args.modules_dir.display(), "External module descriptors registered");
    }

    let builtin_names: Vec<String> =
        modules::builtin_descriptors().into_iter().map(|d| d.name).collect();
    let plan = resolver.resolve_for_modules(&builtin_names, Default::default());

    // Structural validation: invalid target or unsatisfiable plan stops the
    // scan before any worker starts
    let target = match engine::preflight(&args.target, &plan) {
        Ok(target) => target,
        Err(error @ EngineError::InvalidTarget(_)) => {
            error!(target = %args.target, error = %error, "Invalid target");
            return Ok(ExitCode::from(2));
        }
        Err(error) => {
            error!(error = %error, "Module plan rejected");
            return Ok(ExitCode::from(3));
        }
    };
    info!(target = target.value(), kind = ?target.kind(), load_order = ?plan.load_order, "Scan preflight passed");

    // Instantiate built-ins in load order
    let mut instances = modules::builtin_modules();
    instances.sort_by_key(|module| {
        plan.load_order
            .iter()
            .position(|name| name == module.name())
            .unwrap_or(usize::MAX)
    });

    // Repository
    let repository: Arc<dyn ScanRepository> = match &args.data_dir {
        Some(dir) => Arc::new(SledRepository::open(dir.join("scans")).context("opening scan repository")?),
        None => Arc::new(InMemoryRepository::new()),
    };

    let scan_id = args.scan_id.unwrap_or_else(generate_scan_id);
    let engine = ScanEngine::new(scan_id.clone(), target, scan_config, instances, repository)
        .context("initialising scan engine")?;

    let outcome = engine.run().await.context("running scan")?;
    let summary = engine.aggregator().get_summary();
    println!("{}", serde_json::to_string_pretty(&summary).context("rendering summary")?);

    match outcome.status {
        ScanStatus::Finished => Ok(ExitCode::SUCCESS),
        ScanStatus::Aborted => {
            warn!(scan_id = %scan_id, "Scan aborted before completion");
            Ok(ExitCode::from(1))
        }
        _ => Ok(ExitCode::from(1)),
    }
}

fn generate_scan_id() -> String {
    let nonce: u64 = rand::random();
    format!("scan-{nonce:016x}")
}
