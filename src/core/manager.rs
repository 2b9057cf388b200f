// src/core/manager.rs

//! The two-tier configuration manager: a `staged`/`running` pair behind one
//! lock, clone-on-read, a single closure-based mutator, ordered apply hooks,
//! and durable persistence through the round-trip document writer.

use crate::core::document::ConfigDocument;
use crate::core::errors::FlywallError;
use crate::core::model::Config;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// A function invoked after validation on every apply, in registration
/// order. Critical hooks (firewall reload, policy routing) failing cause
/// the overall apply to report failure; non-critical failures only join the
/// partial-failure list.
pub struct ApplyHook {
    pub name: String,
    pub critical: bool,
    func: Arc<dyn Fn(Config) -> BoxFuture<'static, Result<(), FlywallError>> + Send + Sync>,
}

impl ApplyHook {
    pub fn new<F>(name: impl Into<String>, critical: bool, func: F) -> Self
    where
        F: Fn(Config) -> BoxFuture<'static, Result<(), FlywallError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            critical,
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for ApplyHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyHook")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HookFailure {
    pub name: String,
    pub message: String,
    pub critical: bool,
}

/// The outcome of one apply. Promotion always completes; callers decide how
/// to surface `critical_failed`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApplyReport {
    pub version: u64,
    pub partial_failures: Vec<HookFailure>,
    pub critical_failed: bool,
}

#[derive(Debug)]
struct ManagerInner {
    running: Config,
    staged: Config,
    document: ConfigDocument,
    version: u64,
}

#[derive(Debug)]
pub struct ConfigManager {
    inner: RwLock<ManagerInner>,
    hooks: parking_lot::RwLock<Vec<ApplyHook>>,
    /// Serializes applies so hook invocations never overlap.
    apply_lock: Mutex<()>,
    path: PathBuf,
    use_staged_as_running: bool,
}

impl ConfigManager {
    /// Loads the manager from the persisted config file, or starts from the
    /// default tree when the file does not exist yet.
    pub async fn load(path: &Path, use_staged_as_running: bool) -> Result<Self, FlywallError> {
        let (config, document) = match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let document = ConfigDocument::parse(&contents)?;
                let config = document.to_config()?;
                config.validate()?;
                info!(path = %path.display(), "loaded configuration");
                (config, document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "no configuration file found, starting with defaults"
                );
                let config = Config::default();
                let document = ConfigDocument::from_config(&config)?;
                (config, document)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: RwLock::new(ManagerInner {
                running: config.clone(),
                staged: config,
                document,
                version: 1,
            }),
            hooks: parking_lot::RwLock::new(Vec::new()),
            apply_lock: Mutex::new(()),
            path: path.to_path_buf(),
            use_staged_as_running,
        })
    }

    /// In-memory manager for tests and handoff restores.
    pub fn with_config(path: &Path, config: Config) -> Result<Self, FlywallError> {
        let document = ConfigDocument::from_config(&config)?;
        Ok(Self {
            inner: RwLock::new(ManagerInner {
                running: config.clone(),
                staged: config,
                document,
                version: 1,
            }),
            hooks: parking_lot::RwLock::new(Vec::new()),
            apply_lock: Mutex::new(()),
            path: path.to_path_buf(),
            use_staged_as_running: false,
        })
    }

    /// Registers an apply hook. Registration happens once at startup;
    /// hooks run in registration order on every apply.
    pub fn register_hook(&self, hook: ApplyHook) {
        debug!(name = %hook.name, critical = hook.critical, "registering apply hook");
        self.hooks.write().push(hook);
    }

    /// Deep clone of the staged config.
    pub async fn get_staged(&self) -> Config {
        self.inner.read().await.staged.clone()
    }

    /// Deep clone of the running config. With the `use_staged_as_running`
    /// test aid this mirrors the staged config instead.
    pub async fn get_running(&self) -> Config {
        let inner = self.inner.read().await;
        if self.use_staged_as_running {
            inner.staged.clone()
        } else {
            inner.running.clone()
        }
    }

    /// Current config version; bumped on every successful apply.
    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    /// The single mutator: applies `f` to a clone of staged. If `f` (and
    /// validation) succeed the clone replaces staged atomically and is
    /// persisted; if `f` fails staged is unchanged. A persistence failure
    /// after the in-memory swap keeps the in-memory value authoritative.
    pub async fn stage<F>(&self, f: F) -> Result<Config, FlywallError>
    where
        F: FnOnce(&mut Config) -> Result<(), FlywallError>,
    {
        let mut inner = self.inner.write().await;
        let mut candidate = inner.staged.clone();
        f(&mut candidate)?;
        candidate.validate()?;

        let mut document = inner.document.clone();
        document.sync_with(&candidate)?;

        inner.staged = candidate.clone();
        inner.document = document;
        if let Err(e) = persist(&self.path, &inner.document).await {
            warn!(
                path = %self.path.display(),
                "failed to persist staged config, in-memory state is authoritative: {e}"
            );
        }
        Ok(candidate)
    }

    /// Replaces the whole staged config from raw file text.
    pub async fn set_raw(&self, contents: &str) -> Result<Config, FlywallError> {
        let document = ConfigDocument::parse(contents)?;
        let config = document.to_config()?;
        config.validate()?;

        let mut inner = self.inner.write().await;
        inner.staged = config.clone();
        inner.document = document;
        if let Err(e) = persist(&self.path, &inner.document).await {
            warn!("failed to persist staged config: {e}");
        }
        Ok(config)
    }

    /// Raw text of one named section of the staged document.
    pub async fn get_section(
        &self,
        kind: &str,
        label: Option<&str>,
    ) -> Result<String, FlywallError> {
        let inner = self.inner.read().await;
        inner
            .document
            .get_section(kind, label)
            .map(|s| s.body.clone())
            .ok_or_else(|| FlywallError::NotFound(section_name(kind, label)))
    }

    /// Replaces the inner text of one named section and revalidates the
    /// resulting tree.
    pub async fn set_section(
        &self,
        kind: &str,
        label: Option<&str>,
        body: &str,
    ) -> Result<Config, FlywallError> {
        let mut inner = self.inner.write().await;
        let mut document = inner.document.clone();
        document.set_section(kind, label, body);
        let config = document.to_config()?;
        config.validate()?;

        inner.staged = config.clone();
        inner.document = document;
        if let Err(e) = persist(&self.path, &inner.document).await {
            warn!("failed to persist staged config: {e}");
        }
        Ok(config)
    }

    pub async fn delete_section(
        &self,
        kind: &str,
        label: Option<&str>,
    ) -> Result<Config, FlywallError> {
        let mut inner = self.inner.write().await;
        let mut document = inner.document.clone();
        if !document.delete_section(kind, label) {
            return Err(FlywallError::NotFound(section_name(kind, label)));
        }
        let config = document.to_config()?;
        config.validate()?;

        inner.staged = config.clone();
        inner.document = document;
        if let Err(e) = persist(&self.path, &inner.document).await {
            warn!("failed to persist staged config: {e}");
        }
        Ok(config)
    }

    /// Promotes staged to running: hooks run first in registration order
    /// (network changes are registered first, so they fail earliest and
    /// cleanest), then the promotion, then persistence. Hook failures
    /// aggregate into the report; a critical failure marks the report
    /// failed but never stops the promotion.
    pub async fn apply(&self) -> Result<ApplyReport, FlywallError> {
        let _applying = self.apply_lock.lock().await;
        let candidate = self.inner.read().await.staged.clone();
        candidate.validate()?;

        let mut partial_failures = Vec::new();
        let mut critical_failed = false;
        let hooks: Vec<(String, bool, Arc<dyn Fn(Config) -> BoxFuture<'static, Result<(), FlywallError>> + Send + Sync>)> = self
            .hooks
            .read()
            .iter()
            .map(|h| (h.name.clone(), h.critical, h.func.clone()))
            .collect();

        for (name, critical, func) in hooks {
            match func(candidate.clone()).await {
                Ok(()) => debug!(hook = %name, "apply hook succeeded"),
                Err(e) => {
                    error!(hook = %name, critical, "apply hook failed: {e}");
                    if critical {
                        critical_failed = true;
                    }
                    partial_failures.push(HookFailure {
                        name,
                        message: e.to_string(),
                        critical,
                    });
                }
            }
        }

        let version = {
            let mut inner = self.inner.write().await;
            inner.running = candidate;
            inner.version += 1;
            let running = inner.running.clone();
            inner.document.sync_with(&running)?;
            if let Err(e) = persist(&self.path, &inner.document).await {
                warn!(
                    "failed to persist applied config, will re-sync on next apply: {e}"
                );
            }
            inner.version
        };

        info!(version, failures = partial_failures.len(), "configuration applied");
        Ok(ApplyReport {
            version,
            partial_failures,
            critical_failed,
        })
    }

    /// Pure revert: staged becomes a clone of running. Only persistence can
    /// fail, and then in-memory state stays authoritative.
    pub async fn rollback(&self) -> Result<(), FlywallError> {
        let mut inner = self.inner.write().await;
        inner.staged = inner.running.clone();
        let staged = inner.staged.clone();
        inner.document.sync_with(&staged)?;
        if let Err(e) = persist(&self.path, &inner.document).await {
            warn!("failed to persist rollback, in-memory state is authoritative: {e}");
        }
        Ok(())
    }

    /// Renders the current running config to file text, for backups.
    pub async fn render_running(&self) -> Result<String, FlywallError> {
        let inner = self.inner.read().await;
        if self.use_staged_as_running {
            return Ok(inner.document.render());
        }
        let document = ConfigDocument::from_config(&inner.running)?;
        Ok(document.render())
    }
}

fn section_name(kind: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{kind} \"{label}\""),
        None => kind.to_string(),
    }
}

/// Writes the document via a temp file and rename so a crash mid-write
/// never leaves a torn config on disk.
async fn persist(path: &Path, document: &ConfigDocument) -> Result<(), FlywallError> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("conf.tmp");
    tokio::fs::write(&tmp, document.render()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
