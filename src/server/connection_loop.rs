// src/server/connection_loop.rs

//! The main accept loop for the control socket.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use tracing::{debug, info, warn};

/// Accepts connections until a shutdown signal arrives, then drains the
/// background task set.
pub async fn run(mut ctx: ServerContext) {
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, closing control socket");
                break;
            }
            accepted = ctx.listener.accept() => {
                match accepted {
                    Ok((socket, _addr)) => {
                        let session_id = ctx.state.next_session_id();
                        debug!(session = session_id, "accepted control connection");
                        let handler = ConnectionHandler::new(
                            socket,
                            ctx.state.clone(),
                            session_id,
                            ctx.shutdown_tx.subscribe(),
                        );
                        tokio::spawn(async move {
                            if let Err(e) = handler.run().await {
                                warn!(session = session_id, "connection handler error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                    }
                }
            }
        }
    }

    ctx.background_tasks.abort_all();
    while ctx.background_tasks.join_next().await.is_some() {}
    info!("server stopped");
}
