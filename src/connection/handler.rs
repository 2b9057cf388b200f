// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of one
//! control-socket connection: framed reads, dispatch, framed replies.

use super::guard::ConnectionGuard;
use crate::core::errors::FlywallError;
use crate::core::ops;
use crate::core::protocol::{RequestEnvelope, ResponseEnvelope, frame_codec};
use crate::core::state::{ClientMeta, ServerState};
use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

pub struct ConnectionHandler {
    framed: Framed<UnixStream, tokio_util::codec::LengthDelimitedCodec>,
    state: Arc<ServerState>,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: UnixStream,
        state: Arc<ServerState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        state.clients.insert(
            session_id,
            ClientMeta {
                connected_at: Utc::now(),
            },
        );
        Self {
            framed: Framed::new(socket, frame_codec()),
            state,
            session_id,
            shutdown_rx,
        }
    }

    /// The main event loop for the connection.
    pub async fn run(mut self) -> Result<(), FlywallError> {
        let _guard = ConnectionGuard::new(self.state.clone(), self.session_id);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!(session = self.session_id, "connection handler received shutdown signal");
                    return Ok(());
                }
                frame = self.framed.next() => {
                    match frame {
                        Some(Ok(bytes)) => self.process_frame(&bytes).await?,
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!(session = self.session_id, "peer disconnected: {e}");
                            } else {
                                warn!(session = self.session_id, "connection error: {e}");
                            }
                            return Ok(());
                        }
                        None => {
                            debug!(session = self.session_id, "peer closed connection");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn process_frame(&mut self, bytes: &[u8]) -> Result<(), FlywallError> {
        let response = match serde_json::from_slice::<RequestEnvelope>(bytes) {
            Ok(request) => {
                debug!(
                    session = self.session_id,
                    method = %request.method,
                    id = request.id,
                    "request received"
                );
                ops::dispatch(self.state.clone(), request).await
            }
            Err(e) => ResponseEnvelope::err(
                0,
                &FlywallError::InvalidRequest(format!("malformed request frame: {e}")),
            ),
        };
        let encoded = serde_json::to_vec(&response)?;
        self.framed.send(Bytes::from(encoded)).await?;
        Ok(())
    }
}

/// Helper to classify non-critical disconnection errors.
fn is_normal_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    )
}
