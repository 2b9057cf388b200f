// src/core/upgrade.rs

//! Zero-downtime hot upgrade.
//!
//! `stage_binary` verifies architecture and checksum before writing the
//! staged binary next to the runtime dir. `upgrade` re-verifies on disk,
//! disarms the watchdog, hands the listener fd and serialized state to the
//! freshly spawned successor, and schedules delayed self-termination so
//! the RPC reply still flushes.

use crate::core::errors::FlywallError;
use crate::core::services::Watchdog;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};

/// Grace period between replying to `upgrade` and exiting the process.
pub const TERMINATION_DELAY: Duration = Duration::from_secs(5);

/// Environment variable carrying the inherited listener fd to the
/// successor process.
pub const HANDOFF_FD_ENV: &str = "FLYWALL_HANDOFF_FD";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UpgradeState {
    Idle,
    Verifying,
    Staged,
    HandingOff,
    Terminating,
}

/// State serialized for the successor. Leases and backups are re-read
/// from disk by the new process; only what cannot be re-derived rides
/// along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffState {
    pub config_text: String,
    pub socket_path: PathBuf,
    pub config_version: u64,
    pub old_pid: u32,
    pub version: String,
}

#[derive(Debug)]
pub struct UpgradeManager {
    state: Mutex<UpgradeState>,
    staged_path: PathBuf,
    handoff_path: PathBuf,
    staged_checksum: Mutex<Option<String>>,
}

/// `linux/<arch>` for the running host.
pub fn host_arch() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl UpgradeManager {
    pub fn new(staged_path: PathBuf, handoff_path: PathBuf) -> Self {
        Self {
            state: Mutex::new(UpgradeState::Idle),
            staged_path,
            handoff_path,
            staged_checksum: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> UpgradeState {
        *self.state.lock().await
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }

    /// Verifies and writes the new binary. Nothing touches the disk until
    /// both the architecture and the checksum check out.
    pub async fn stage_binary(
        &self,
        data: &[u8],
        checksum: &str,
        arch: &str,
    ) -> Result<(), FlywallError> {
        let mut state = self.state.lock().await;
        if matches!(*state, UpgradeState::HandingOff | UpgradeState::Terminating) {
            return Err(FlywallError::InvalidState(format!(
                "upgrade already in progress ({state})"
            )));
        }
        *state = UpgradeState::Verifying;

        let host = host_arch();
        if arch != host {
            *state = UpgradeState::Idle;
            return Err(FlywallError::ArchitectureMismatch {
                host,
                binary: arch.to_string(),
            });
        }

        let actual = sha256_hex(data);
        if !actual.eq_ignore_ascii_case(checksum) {
            *state = UpgradeState::Idle;
            return Err(FlywallError::ChecksumMismatch);
        }

        if let Some(parent) = self.staged_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.staged_path, data).await?;
        tokio::fs::set_permissions(&self.staged_path, std::fs::Permissions::from_mode(0o755))
            .await?;

        *self.staged_checksum.lock().await = Some(actual);
        *state = UpgradeState::Staged;
        info!(path = %self.staged_path.display(), "upgrade binary staged");
        Ok(())
    }

    /// Runs the handoff: re-verifies the on-disk binary against the
    /// caller's checksum, disarms the watchdog, and launches the successor
    /// with the inherited listener. On any failure the watchdog is rearmed
    /// and the staged binary remains usable. The caller releases
    /// kernel-bound resources afterwards and then calls [`Self::finalize`].
    pub async fn upgrade(
        &self,
        checksum: &str,
        handoff: HandoffState,
        listener_fd: RawFd,
        watchdog: Arc<dyn Watchdog>,
    ) -> Result<(), FlywallError> {
        let mut state = self.state.lock().await;
        if *state != UpgradeState::Staged {
            return Err(FlywallError::InvalidState(format!(
                "no staged binary (state is {state})"
            )));
        }

        // The caller's claim must match both what was staged and what is
        // actually on disk right now.
        if let Some(staged) = self.staged_checksum.lock().await.as_deref()
            && !staged.eq_ignore_ascii_case(checksum)
        {
            return Err(FlywallError::ChecksumMismatch);
        }
        let on_disk = tokio::fs::read(&self.staged_path).await?;
        let actual = sha256_hex(&on_disk);
        if !actual.eq_ignore_ascii_case(checksum) {
            return Err(FlywallError::ChecksumMismatch);
        }

        *state = UpgradeState::HandingOff;
        watchdog.disarm();

        if let Err(e) = self.launch_successor(&handoff, listener_fd).await {
            error!("upgrade handoff failed, rearming watchdog: {e}");
            watchdog.rearm();
            *state = UpgradeState::Staged;
            return Err(e);
        }
        Ok(())
    }

    /// Schedules the delayed self-termination once kernel resources are
    /// released, so the RPC reply flushes and the successor stabilizes.
    pub async fn finalize(&self, shutdown_tx: broadcast::Sender<()>) {
        *self.state.lock().await = UpgradeState::Terminating;
        info!(
            delay_secs = TERMINATION_DELAY.as_secs(),
            "handoff complete, scheduling self-termination"
        );
        tokio::spawn(async move {
            tokio::time::sleep(TERMINATION_DELAY).await;
            info!("upgrade termination timer fired, shutting down");
            let _ = shutdown_tx.send(());
        });
    }

    async fn launch_successor(
        &self,
        handoff: &HandoffState,
        listener_fd: RawFd,
    ) -> Result<(), FlywallError> {
        let tmp = self.handoff_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(handoff)?).await?;
        tokio::fs::rename(&tmp, &self.handoff_path).await?;

        // The successor inherits the listener directly; clear close-on-exec
        // so it survives the spawn.
        let flags = unsafe { libc::fcntl(listener_fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if unsafe { libc::fcntl(listener_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let child = std::process::Command::new(&self.staged_path)
            .env(HANDOFF_FD_ENV, listener_fd.to_string())
            .spawn()
            .map_err(|e| {
                FlywallError::Internal(format!(
                    "failed to launch successor '{}': {e}",
                    self.staged_path.display()
                ))
            })?;
        info!(pid = child.id(), "successor process launched");
        Ok(())
    }
}

/// Reads the serialized handoff state when the process was started by a
/// predecessor, consuming the file so a later crash-restart boots clean.
pub async fn read_handoff(path: &Path) -> Option<HandoffState> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("failed to read handoff state: {e}");
            return None;
        }
    };
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("failed to remove consumed handoff state: {e}");
    }
    match serde_json::from_str(&contents) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("handoff state unreadable, starting fresh: {e}");
            None
        }
    }
}
