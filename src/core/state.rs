// src/core/state.rs

//! Defines the central `ServerState` struct, holding all shared
//! server-wide state. Wrapped in an `Arc` and handed to every connection
//! handler and background task.

use crate::config::Settings;
use crate::core::backups::BackupStore;
use crate::core::errors::FlywallError;
use crate::core::learning::{LearningEngine, LearningPipeline};
use crate::core::manager::ConfigManager;
use crate::core::notifications::NotificationHub;
use crate::core::safe_apply::SafeApplyManager;
use crate::core::scheduler::Scheduler;
use crate::core::services::Services;
use crate::core::upgrade::UpgradeManager;
use crate::core::verdict::{InlineQueue, LogGroupSource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, broadcast};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

/// Metadata kept per connected control client.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub connected_at: DateTime<Utc>,
}

/// The central struct holding all shared, server-wide state.
pub struct ServerState {
    pub settings: Settings,
    pub manager: Arc<ConfigManager>,
    pub backups: Arc<BackupStore>,
    pub notifications: Arc<NotificationHub>,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<LearningEngine>,
    pub pipeline: Arc<LearningPipeline>,
    pub safe_apply: Arc<SafeApplyManager>,
    pub upgrade: Arc<UpgradeManager>,
    /// Injected capability handles behind the server's coarse lock;
    /// handlers hold it only long enough to clone the Arcs they need.
    pub services: Mutex<Services>,
    pub safe_mode: AtomicBool,
    /// A map of all active client connections, keyed by session id.
    pub clients: DashMap<u64, ClientMeta>,
    next_session_id: AtomicU64,
    pub shutdown_tx: broadcast::Sender<()>,
    /// Handle to the logging filter, for runtime log level changes.
    pub log_reload_handle:
        Option<Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>>,
    pub started_at: Instant,
    /// Raw fd of the control listener, captured for upgrade handoff.
    pub listener_fd: AtomicU64,
}

impl ServerState {
    /// Initializes the entire server state from settings plus injected
    /// services. This is the main factory for the shared context.
    pub async fn initialize(
        settings: Settings,
        services: Services,
        log_reload_handle: Option<
            Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
        >,
    ) -> Result<Arc<Self>, FlywallError> {
        let manager = Arc::new(
            ConfigManager::load(&settings.config_path(), settings.use_staged_as_running).await?,
        );
        let backups = Arc::new(BackupStore::open(&settings.backups_dir()).await?);
        let notifications = Arc::new(NotificationHub::new());
        let scheduler = Arc::new(Scheduler::new());

        let learning_settings = manager.get_running().await.learning;
        let engine = Arc::new(LearningEngine::new(learning_settings.clone()));
        let base_source = Arc::new(LogGroupSource::new(0));
        let learn_source = Arc::new(LogGroupSource::new(learning_settings.log_group));
        let queue = Arc::new(InlineQueue::new(learning_settings.queue_num));
        let pipeline = Arc::new(LearningPipeline::new(
            engine.clone(),
            base_source,
            learn_source,
            queue,
        ));

        let upgrade = Arc::new(UpgradeManager::new(
            settings.staged_binary_path(),
            settings.handoff_path(),
        ));

        let (shutdown_tx, _) = broadcast::channel(8);

        let state = Arc::new(Self {
            settings,
            manager,
            backups,
            notifications,
            scheduler,
            engine,
            pipeline,
            safe_apply: Arc::new(SafeApplyManager::new()),
            upgrade,
            services: Mutex::new(services),
            safe_mode: AtomicBool::new(false),
            clients: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            shutdown_tx,
            log_reload_handle,
            started_at: Instant::now(),
            listener_fd: AtomicU64::new(0),
        });
        info!("server state initialized");
        Ok(state)
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Snapshot of the injected services; the coarse lock is held only
    /// for the duration of the clone.
    pub async fn services(&self) -> Services {
        self.services.lock().await.clone()
    }

    pub fn is_in_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    pub fn set_safe_mode(&self, value: bool) {
        self.safe_mode.store(value, Ordering::SeqCst);
    }

    pub fn set_listener_fd(&self, fd: RawFd) {
        self.listener_fd.store(fd as u64, Ordering::SeqCst);
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener_fd.load(Ordering::SeqCst) as RawFd
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("safe_mode", &self.safe_mode)
            .finish_non_exhaustive()
    }
}
