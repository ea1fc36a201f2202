#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # md5fic
//!
//! File integrity check over TCP.
//!
//! ## Subcommands
//!
//! - `md5fic serve`: receive files on port 8888, verify, keep or discard
//! - `md5fic send <file>`: hash a file, send it, print the verdict
//! - `md5fic digest <file>...`: print MD5 digests in `md5sum` format
//!
//! ## Wire format
//!
//! | Offset | Length | Field          |
//! |--------|--------|----------------|
//! | 0      | 8      | payload length, big-endian `u64` |
//! | 8      | 32     | lowercase hex MD5 of the payload |
//! | 40     | N      | payload        |
//!
//! The receiver answers `File integrity verified.` or
//! `File integrity not verified.` followed by a newline, then closes.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use md5fic::config::Config;
use md5fic::server;
use md5fic::transfer::{hasher, sender, ReceiveStore, Receiver};

/// File integrity check over TCP.
#[derive(Parser)]
#[command(name = "md5fic", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive files and verify them against the sender's digest.
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Send a file and wait for the receiver's verdict.
    Send {
        /// File to send.
        file: PathBuf,
        /// Receiver address, e.g. `127.0.0.1:8888`.
        #[arg(long)]
        server: Option<String>,
        /// Precomputed hex digest. Computed from the file when omitted.
        #[arg(long)]
        digest: Option<String>,
        /// Seconds to wait for the verdict.
        #[arg(long)]
        timeout: Option<u64>,
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Print the MD5 digest of each file.
    Digest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => run_server(config.as_deref()).await,
        Commands::Send {
            file,
            server,
            digest,
            timeout,
            config,
        } => run_send(file, server, digest, timeout, config.as_deref()).await,
        Commands::Digest { files } => run_digest(&files).await,
    }
}

fn load_config(path: Option<&str>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("md5fic: {e}");
            None
        }
    }
}

fn init_tracing(config: &Config) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_server(config_path: Option<&str>) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    init_tracing(&config);

    info!("md5fic v{} starting", env!("CARGO_PKG_VERSION"));

    let store = ReceiveStore::new(config.server.receive_dir(), config.server.digest_dir());
    if let Err(e) = store.ensure_dirs().await {
        error!("Failed to create receive directories: {e}");
        return ExitCode::FAILURE;
    }
    info!(
        payload_dir = %store.payload_dir().display(),
        digest_dir = %store.digest_dir().display(),
        "Receive directories ready"
    );

    if config.server.max_file_size == 0 {
        warn!("server.max_file_size is 0, declared payload sizes are not bounded");
    }

    let listener = match TcpListener::bind(&config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", config.server.listen);
            return ExitCode::FAILURE;
        }
    };
    info!("Listening on {}", config.server.listen);

    let receiver = Arc::new(Receiver::new(store, config.server.max_file_size));
    server::run(
        listener,
        receiver,
        shutdown_signal(),
        config.server.shutdown_grace(),
    )
    .await;

    info!("Goodbye");
    ExitCode::SUCCESS
}

async fn run_send(
    file: PathBuf,
    server: Option<String>,
    digest: Option<String>,
    timeout: Option<u64>,
    config_path: Option<&str>,
) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    init_tracing(&config);

    let addr = server.unwrap_or(config.client.server.clone());
    let timeout = timeout.map_or_else(|| config.client.response_timeout(), Duration::from_secs);

    let outcome = match digest {
        Some(digest) => sender::send_file(addr.as_str(), &file, &digest, timeout)
            .await
            .map(|verdict| (digest, verdict)),
        None => sender::send_file_hashed(addr.as_str(), &file, timeout).await,
    };

    match outcome {
        Ok((digest, verdict)) => {
            println!("{digest}  {}", file.display());
            println!("Server response: {verdict}");
            if verdict.is_verified() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("md5fic: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_digest(files: &[PathBuf]) -> ExitCode {
    let mut status = ExitCode::SUCCESS;
    for path in files {
        match hasher::hash_file(path).await {
            Ok(digest) => println!("{digest}  {}", path.display()),
            Err(e) => {
                eprintln!("md5fic: {}: {e}", path.display());
                status = ExitCode::FAILURE;
            }
        }
    }
    status
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
