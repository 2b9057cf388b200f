// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource
//! management.

use crate::core::state::ServerState;
use std::sync::Arc;
use tracing::debug;

/// Ensures the client's session entry is removed however the handler's
/// scope is exited, including on panic unwind.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    session_id: u64,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, session_id: u64) -> Self {
        Self { state, session_id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.state.clients.remove(&self.session_id).is_some() {
            debug!(
                session = self.session_id,
                "connection guard cleaned up session"
            );
        }
    }
}
