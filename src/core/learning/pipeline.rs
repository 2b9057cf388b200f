// src/core/learning/pipeline.rs

//! Routes packet metadata between the verdict bus and the learning engine.
//!
//! Async mode drains two observational log groups into `ingest_packet`;
//! inline mode installs a verdict function on the kernel queue. If the
//! inline bind is refused the pipeline downgrades to async and says so.

use super::engine::LearningEngine;
use crate::core::errors::FlywallError;
use crate::core::model::LearningMode;
use crate::core::verdict::{PacketSource, VerdictQueue, map_verdict};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct LearningPipeline {
    engine: Arc<LearningEngine>,
    /// Log group 0: everything the firewall logs.
    base_source: Arc<dyn PacketSource>,
    /// The dedicated learning log group.
    learn_source: Arc<dyn PacketSource>,
    queue: Arc<dyn VerdictQueue>,
    /// The mode actually in effect after any fallback.
    effective_mode: RwLock<Option<LearningMode>>,
}

impl LearningPipeline {
    pub fn new(
        engine: Arc<LearningEngine>,
        base_source: Arc<dyn PacketSource>,
        learn_source: Arc<dyn PacketSource>,
        queue: Arc<dyn VerdictQueue>,
    ) -> Self {
        Self {
            engine,
            base_source,
            learn_source,
            queue,
            effective_mode: RwLock::new(None),
        }
    }

    pub fn engine(&self) -> Arc<LearningEngine> {
        self.engine.clone()
    }

    /// Mode in effect, once started.
    pub fn effective_mode(&self) -> Option<LearningMode> {
        *self.effective_mode.read()
    }

    /// Starts the pipeline in the configured mode. Inline bind refusal
    /// falls back to async rather than failing startup.
    pub async fn start(
        self: &Arc<Self>,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Result<(), FlywallError> {
        let settings = self.engine.settings();
        if !settings.enabled {
            info!("learning pipeline disabled by configuration");
            return Ok(());
        }

        if settings.mode == LearningMode::Inline {
            let engine = self.engine.clone();
            let offload_mark = settings.offload_mark;
            self.queue.set_verdict_fn(Arc::new(move |packet| {
                map_verdict(engine.process_packet_inline(packet), offload_mark)
            }));
            match self.queue.start().await {
                Ok(()) => {
                    *self.effective_mode.write() = Some(LearningMode::Inline);
                    info!("learning pipeline running inline");
                    return Ok(());
                }
                Err(e) => {
                    warn!("inline verdict queue unavailable, falling back to async mode: {e}");
                }
            }
        }

        self.base_source.start().await?;
        self.learn_source.start().await?;
        self.spawn_drain(self.base_source.subscribe(), "log-group-0", shutdown_tx);
        self.spawn_drain(
            self.learn_source.subscribe(),
            "learning-log-group",
            shutdown_tx,
        );
        *self.effective_mode.write() = Some(LearningMode::Async);
        info!("learning pipeline running async");
        Ok(())
    }

    fn spawn_drain(
        self: &Arc<Self>,
        mut rx: tokio::sync::mpsc::Receiver<crate::core::verdict::PacketInfo>,
        name: &'static str,
        shutdown_tx: &broadcast::Sender<()>,
    ) {
        let engine = self.engine.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!(subscriber = name, "learning subscriber shutting down");
                        return;
                    }
                    event = rx.recv() => {
                        match event {
                            Some(packet) => engine.ingest_packet(packet),
                            None => {
                                debug!(subscriber = name, "packet source closed");
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stops both bus endpoints. Must run before the process exits during
    /// an upgrade so the successor can bind the same kernel resources.
    pub async fn stop(&self) {
        self.queue.stop().await;
        self.base_source.stop().await;
        self.learn_source.stop().await;
        *self.effective_mode.write() = None;
        info!("learning pipeline stopped");
    }
}

impl std::fmt::Debug for LearningPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningPipeline")
            .field("effective_mode", &*self.effective_mode.read())
            .finish_non_exhaustive()
    }
}
