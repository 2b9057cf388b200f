// src/client.rs

//! The control client used by CLIs and frontends.
//!
//! Holds at most one live socket. Transport errors that look like a lost
//! connection trigger one transparent reconnect and retry; the swap is
//! idempotent, so when another caller already reconnected the retry rides
//! the newer connection. In mock mode a table of pre-canned replies
//! short-circuits a named subset of operations so tests can exercise the
//! API without a kernel-capable host.

use crate::config::Settings;
use crate::core::errors::FlywallError;
use crate::core::notifications::NotificationBatch;
use crate::core::ops::StatusReply;
use crate::core::protocol::{RequestEnvelope, ResponseEnvelope, frame_codec};
use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use once_cell::sync::Lazy;
use rand::Rng;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Conn = Framed<UnixStream, tokio_util::codec::LengthDelimitedCodec>;

#[derive(Default)]
struct ConnState {
    framed: Option<Conn>,
    /// Bumped every time a fresh connection is installed, so a failed
    /// caller only tears down the connection it actually used.
    generation: u64,
}

pub struct ControlClient {
    socket_path: PathBuf,
    conn: Mutex<ConnState>,
    next_id: AtomicU64,
    mock: bool,
}

impl ControlClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            conn: Mutex::new(ConnState::default()),
            next_id: AtomicU64::new(1),
            mock: false,
        }
    }

    /// Builds a client from settings, honoring the mock-RPC switch.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut client = Self::new(&settings.socket_path);
        client.mock = settings.mock_rpc;
        client
    }

    /// Forces mock mode regardless of settings.
    pub fn mocked(socket_path: impl AsRef<Path>) -> Self {
        let mut client = Self::new(socket_path);
        client.mock = true;
        client
    }

    /// Invokes one method. The panic guard turns internal corruption into
    /// an error return rather than unwinding into the caller.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value, FlywallError> {
        if self.mock
            && let Some(reply) = MOCK_REPLIES.get(method)
        {
            debug!(method, "mock rpc short-circuit");
            return Ok(reply.clone());
        }

        AssertUnwindSafe(self.call_with_retry(method, args))
            .catch_unwind()
            .await
            .map_err(|_| FlywallError::Internal(format!("client call '{method}' panicked")))?
    }

    async fn call_with_retry(&self, method: &str, args: Value) -> Result<Value, FlywallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.call_once(id, method, &args).await {
            Ok(value) => Ok(value),
            Err((e, generation)) if is_disconnect(&e) => {
                warn!(method, "connection lost ({e}), reconnecting once");
                self.invalidate(generation).await;
                // Small jitter so a herd of callers does not stampede a
                // restarting server.
                let backoff = rand::thread_rng().gen_range(10..50);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                self.call_once(id, method, &args)
                    .await
                    .map_err(|(e, _)| e)
            }
            Err((e, _)) => Err(e),
        }
    }

    /// One attempt over whatever connection is current, establishing one
    /// if needed. Errors carry the generation they happened on.
    async fn call_once(
        &self,
        id: u64,
        method: &str,
        args: &Value,
    ) -> Result<Value, (FlywallError, u64)> {
        let mut state = self.conn.lock().await;
        if state.framed.is_none() {
            let framed = self.connect().await.map_err(|e| (e, state.generation))?;
            state.framed = Some(framed);
            state.generation += 1;
        }
        let generation = state.generation;
        let framed = state.framed.as_mut().expect("connection just installed");

        let request = RequestEnvelope {
            id,
            method: method.to_string(),
            args: args.clone(),
        };
        let frame = serde_json::to_vec(&request).map_err(|e| (e.into(), generation))?;

        let exchange = async {
            framed.send(Bytes::from(frame)).await?;
            loop {
                let Some(reply) = framed.next().await else {
                    return Err(FlywallError::Io(std::sync::Arc::new(
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed mid-call",
                        ),
                    )));
                };
                let reply = reply?;
                let envelope: ResponseEnvelope = serde_json::from_slice(&reply)?;
                if envelope.id == id {
                    return envelope.into_result();
                }
                debug!(got = envelope.id, want = id, "skipping stale reply");
            }
        };

        match tokio::time::timeout(CALL_TIMEOUT, exchange).await {
            Ok(result) => result.map_err(|e| (e, generation)),
            Err(_) => Err((
                FlywallError::Timeout(format!("call '{method}' exceeded 30s")),
                generation,
            )),
        }
    }

    async fn connect(&self) -> Result<Conn, FlywallError> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                FlywallError::Timeout(format!(
                    "dialing control socket '{}'",
                    self.socket_path.display()
                ))
            })??;
        Ok(Framed::new(stream, frame_codec()))
    }

    /// Drops the connection, but only if nobody reconnected since the
    /// failure we observed.
    async fn invalidate(&self, failed_generation: u64) {
        let mut state = self.conn.lock().await;
        if state.generation == failed_generation {
            state.framed = None;
        }
    }

    // --- Typed helpers ---

    pub async fn status(&self) -> Result<StatusReply, FlywallError> {
        let value = self.call("status", Value::Null).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn apply_config(&self) -> Result<Value, FlywallError> {
        self.call("apply_config", Value::Null).await
    }

    pub async fn discard_config(&self) -> Result<Value, FlywallError> {
        self.call("discard_config", Value::Null).await
    }

    pub async fn notifications_since(
        &self,
        since_id: u64,
    ) -> Result<NotificationBatch, FlywallError> {
        let value = self
            .call("notifications_since", json!({ "since_id": since_id }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn is_disconnect(e: &FlywallError) -> bool {
    matches!(e, FlywallError::Io(io_err) if matches!(
        io_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotConnected
    ))
}

/// The named subset of operations that short-circuit in mock mode.
static MOCK_REPLIES: Lazy<HashMap<&'static str, Value>> = Lazy::new(mock_replies);

fn mock_replies() -> HashMap<&'static str, Value> {
    let mut replies = HashMap::new();
    replies.insert(
        "status",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": 0,
            "config_version": 1,
            "safe_mode": false,
            "pending_rules": 0,
            "tracked_flows": 0,
            "upgrade_state": "idle",
            "memory_used_bytes": 0,
            "memory_total_bytes": 0,
            "load_average_one": 0.0,
            "notifications_last_id": 0
        }),
    );
    replies.insert("ping", json!({ "host": "mock", "rtt_ms": 1 }));
    replies.insert("list_interfaces", json!([]));
    replies.insert("dhcp_leases", json!([]));
    replies.insert(
        "dns_stats",
        json!({ "queries": 0, "cache_hits": 0, "blocked": 0 }),
    );
    replies.insert("list_backups", json!([]));
    replies.insert("is_in_safe_mode", json!(false));
    replies.insert(
        "replication_status",
        json!({ "enabled": false, "peer": null, "last_sync": null, "in_sync": false }),
    );
    replies
}
