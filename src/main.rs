//! Storage Autoscaler
//!
//! Runs the reconciliation loop and its REST API. Without a cloud account or
//! storage cluster wired in, the binary drives the in-memory providers so the
//! control loop and API can be exercised end to end.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_autoscaler::{
    ApiServer, ApiServerConfig, Class, Config, FakeCloud, FakeStorage, Manager, ManagerOptions,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Autoscaler - keeps storage class utilization within its watermarks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Class configuration file (YAML, or JSON with a .json extension)
    #[arg(long, env = "AUTOSCALER_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Seconds between passes; 0 runs passes only when triggered
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "30")]
    reconcile_interval_secs: u64,

    /// Instance ids of the storage nodes to simulate
    #[arg(long, env = "NODES", value_delimiter = ',', default_value = "node-1,node-2,node-3")]
    nodes: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Storage Autoscaler");
    info!("  Version: {}", storage_autoscaler::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Nodes: {}", args.nodes.join(","));

    let config = match &args.config {
        Some(path) => {
            info!("  Config: {}", path.display());
            Config::from_file(path)?
        }
        None => {
            info!("  Config: built-in gp2 class");
            Config::new(vec![default_class()])
        }
    };

    let options = ManagerOptions {
        reconcile_interval: match args.reconcile_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        ..Default::default()
    };

    let cloud = Arc::new(FakeCloud::new());
    let storage = Arc::new(FakeStorage::with_nodes(args.nodes.iter().cloned()));
    let manager = Manager::with_options(config, cloud, storage.clone(), options)?;
    manager.start()?;

    let rest_addr: SocketAddr = args
        .api_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid REST API address {}: {}", args.api_addr, e))?;
    let api_server = Arc::new(
        ApiServer::new(ApiServerConfig { rest_addr }, manager.clone()).with_simulator(storage),
    );

    let server = api_server.clone();
    let serve = tokio::spawn(async move { server.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    manager.stop();
    api_server.shutdown();
    match serve.await {
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Autoscaler shutdown complete");
    Ok(())
}

fn default_class() -> Class {
    Class {
        name: "gp2".into(),
        watermark_high: 75,
        watermark_low: 25,
        disk_size_gb: 8,
        maximum_total_size_gb: 1024,
        minimum_total_size_gb: 32,
        ..Default::default()
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
