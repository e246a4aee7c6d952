//! # Safety Node
//!
//! Binary entry point: parses the CLI, sets up tracing, loads the TOML
//! configuration, opens the serial uplink, and hands control to the
//! arbitration loop. Only startup failures exit non-zero; the loop itself
//! absorbs and logs everything.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use safety_node::config::{load_config, SafetyNodeConfig};
use safety_node::cycle::CycleRunner;
use safety_node::error::NodeError;
use safety_node::transport::SerialLink;

const DEFAULT_CONFIG_PATH: &str = "config/safety_node.toml";

/// Safety Node — vehicle safety state arbitration over a serial uplink
#[derive(Parser, Debug)]
#[command(name = "safety_node")]
#[command(version)]
#[command(about = "Deterministic safety state arbitration for the autonomous control stack")]
struct Args {
    /// Serial device of the upstream compute node (overrides the config value).
    port: Option<String>,

    /// Path to the node configuration TOML. Defaults to
    /// config/safety_node.toml; built-in defaults apply when that is absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("Safety Node v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Safety Node shutdown complete");
}

fn run(args: &Args) -> Result<(), NodeError> {
    let mut config = match &args.config {
        // An explicitly named config file must exist.
        Some(path) => load_config(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)?
            } else {
                info!("no config file at {DEFAULT_CONFIG_PATH}, using defaults");
                SafetyNodeConfig::default()
            }
        }
    };
    if let Some(port) = &args.port {
        config.port = port.clone();
    }

    info!(
        port = %config.port,
        cycle_time_ms = config.cycle_time_ms,
        stale_to_emergency = config.stale_to_emergency,
        "config OK"
    );

    // The uplink is the whole point of the node: failing to open it is fatal.
    let link = SerialLink::open(&config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let mut runner = CycleRunner::new(link, &config, shutdown);
    runner.run();

    let stats = runner.stats();
    info!(
        cycles = stats.cycles,
        messages = stats.messages_applied,
        transitions = stats.transitions,
        write_failures = stats.write_failures,
        "arbitration loop finished"
    );
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
