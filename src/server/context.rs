// src/server/context.rs

//! The assembled server context handed between the setup phases.

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: UnixListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}
