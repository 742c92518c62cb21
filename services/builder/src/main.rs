//! imagesmith - build custom compute images
//!
//! `imagesmith build` runs the whole pipeline against the configured compute
//! endpoint and prints the resulting artifact as JSON. `imagesmith validate`
//! only loads and checks the configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use smith_builder::compute::HttpComputeClient;
use smith_builder::provision::{CommandProvisioner, NoopProvisioner, Provisioner};
use smith_builder::{Config, Driver, Pipeline, PipelineError};
use smith_reconcile::CallContext;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// imagesmith - build custom compute images.
#[derive(Debug, Parser)]
#[command(name = "imagesmith", version, about)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an image.
    Build {
        /// Path to the build configuration.
        #[arg(short, long, env = "IMAGESMITH_CONFIG")]
        config: PathBuf,

        /// Give up after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Shell command run against the instance before it is imaged.
        #[arg(long)]
        provision_command: Option<String>,
    },

    /// Load and validate a configuration without building.
    Validate {
        /// Path to the build configuration.
        #[arg(short, long, env = "IMAGESMITH_CONFIG")]
        config: PathBuf,
    },

    /// List instances left over from earlier builds.
    Instances {
        /// Path to the build configuration.
        #[arg(short, long, env = "IMAGESMITH_CONFIG")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Build {
            config,
            timeout,
            provision_command,
        } => build(config, timeout, provision_command).await,
        Command::Validate { config } => {
            Config::load(&config)?;
            info!(config = %config.display(), "Configuration is valid");
            Ok(())
        }
        Command::Instances { config } => instances(config).await,
    }
}

fn driver(config_path: &Path) -> Result<Driver> {
    let config = Config::load(config_path)?;
    let client = HttpComputeClient::new(&config.endpoint)
        .context("Failed to create compute client")?;
    Ok(Driver::new(Arc::new(client), Arc::new(config)))
}

/// Context cancelled on Ctrl-C, optionally bounded by a timeout.
fn run_context(timeout: Option<u64>) -> CallContext {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, abandoning build");
            let _ = shutdown_tx.send(true);
        }
    });

    let ctx = CallContext::with_shutdown(shutdown_rx);
    match timeout {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    }
}

async fn build(
    config_path: PathBuf,
    timeout: Option<u64>,
    provision_command: Option<String>,
) -> Result<()> {
    let driver = driver(&config_path)?;
    let provisioner: Arc<dyn Provisioner> = match provision_command {
        Some(command) => Arc::new(CommandProvisioner::new(command)),
        None => Arc::new(NoopProvisioner),
    };
    let pipeline = Pipeline::new(driver, provisioner);
    let ctx = run_context(timeout);

    match pipeline.run(&ctx).await {
        Ok(artifact) => {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            std::process::exit(1);
        }
    }
}

fn report_failure(e: &PipelineError) {
    error!(step = %e.step, error = %e, "Build failed");

    eprintln!("Error: {e}");
    if !e.leftovers.is_empty() {
        eprintln!("Resources left behind:");
        if let Some(id) = &e.leftovers.instance_id {
            eprintln!("  instance: {id}");
        }
        if let Some(id) = &e.leftovers.image_id {
            eprintln!("  image:    {id}");
        }
    }
}

async fn instances(config_path: PathBuf) -> Result<()> {
    let driver = driver(&config_path)?;
    let ctx = run_context(None);

    let instances = driver
        .list_build_instances(&ctx)
        .await
        .context("Failed to list build instances")?;
    println!("{}", serde_json::to_string_pretty(&instances)?);
    Ok(())
}
