// src/server/mod.rs

use crate::config::Settings;
use crate::core::services::Services;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, reload};

mod connection_loop;
mod context;
mod initialization;
mod spawner;

pub use connection_loop::run as serve;
pub use context::ServerContext;
pub use initialization::setup;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    settings: Settings,
    services: Services,
    log_reload_handle: Option<Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>>,
) -> Result<()> {
    // 1. Initialize server state, crash-loop detection, and the listener.
    let mut server_context = initialization::setup(settings, services, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Run the accept loop until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
