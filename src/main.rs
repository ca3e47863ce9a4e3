use anyhow::Result;
use clap::{value_parser, Arg, Command};
use simple_db::{config::EngineConfig, dispatcher::Dispatcher, engine::Engine, server::serve};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{fmt, EnvFilter};

/// Main entry point for the simple-db server.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes structured logging with tracing
/// 3. Loads the configuration file (if any) and applies flag overrides
/// 4. Creates the record store and starts the dispatcher's worker pool
/// 5. Starts the TCP server to accept SQL connections
///
/// # Arguments
/// - `--listen ADDR`: TCP address to bind to (default: 127.0.0.1:8000)
/// - `--config FILE`: JSON configuration file
/// - `--capacity N`: number of record slots
/// - `--workers N`: size of the query worker pool
///
/// # Example Usage
/// ```bash
/// cargo run -- --listen 127.0.0.1:8000 --capacity 1000 --workers 4
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let matches = Command::new("simple-db")
        .about("Single-table in-memory database with per-record locking")
        .arg(Arg::new("listen")
            .long("listen")
            .value_name("ADDR")
            .default_value("127.0.0.1:8000")
            .help("Listen address for TCP SQL server"))
        .arg(Arg::new("config")
            .long("config")
            .value_name("FILE")
            .value_parser(value_parser!(PathBuf))
            .help("JSON configuration file"))
        .arg(Arg::new("capacity")
            .long("capacity")
            .value_name("N")
            .value_parser(value_parser!(usize))
            .help("Number of record slots (overrides the config file)"))
        .arg(Arg::new("workers")
            .long("workers")
            .value_name("N")
            .value_parser(value_parser!(usize))
            .help("Query worker pool size (overrides the config file)"))
        .get_matches();

    // Initialize structured logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(capacity) = matches.get_one::<usize>("capacity") {
        config.capacity = *capacity;
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.workers = *workers;
    }
    config.validate()?;

    let listen = matches
        .get_one::<String>("listen")
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:8000".to_string());

    let engine = Arc::new(Engine::from_config(&config));
    let dispatcher = Arc::new(Dispatcher::start(engine, &config)?);

    // Start the TCP server
    serve(dispatcher, &listen).await
}
