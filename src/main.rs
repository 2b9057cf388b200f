// src/main.rs

//! The main entry point for the Flywall control-plane daemon.

use anyhow::Result;
use flywall::config::Settings;
use flywall::core::services::{HostSystemControl, Services};
use flywall::server;
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("flywall version {VERSION}");
        return Ok(());
    }

    // Resolve process settings from the environment once; nothing else
    // reads env vars after this point.
    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid settings: {e}");
            std::process::exit(1);
        }
    };

    // A state-dir override keeps development hosts away from /var.
    if let Some(index) = args.iter().position(|arg| arg == "--state-dir") {
        match args.get(index + 1) {
            Some(dir) => settings = Settings::rooted_at(std::path::Path::new(dir)),
            None => {
                eprintln!("--state-dir flag requires a value");
                std::process::exit(1);
            }
        }
    }
    if args.contains(&"--test-mode".to_string()) {
        settings.test_mode = true;
    }

    // Setup logging with reloading capabilities so the control API can
    // change the level at runtime.
    let initial_log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true),
        )
        .init();
    let reload_handle = Arc::new(reload_handle);

    info!(version = VERSION, "starting flywall control plane");

    let mut services = Services::noop();
    if !settings.test_mode {
        services.system = Arc::new(HostSystemControl);
    }

    if let Err(e) = server::run(settings, services, Some(reload_handle)).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
