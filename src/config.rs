// src/config.rs

//! Process-level settings: directory layout, control socket path, and test
//! switches. Constructed exactly once at startup and injected everywhere;
//! no reachable code reads process environment directly after this point.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable prefix, derived from the brand.
const ENV_PREFIX: &str = "FLYWALL";

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/flywall")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/flywall")
}
fn default_run_dir() -> PathBuf {
    PathBuf::from("/run/flywall")
}
fn default_share_dir() -> PathBuf {
    PathBuf::from("/usr/share/flywall")
}

/// Mode bits for the control socket and its parent directory. Restrictive on
/// purpose: unprivileged access goes through group membership, never a
/// world-writable socket.
pub const SOCKET_MODE: u32 = 0o660;
pub const SOCKET_DIR_MODE: u32 = 0o750;

/// The resolved, validated process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub run_dir: PathBuf,
    pub share_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Skips crash-loop detection; set by integration harnesses.
    pub test_mode: bool,
    /// Test aid: `get_running()` mirrors `get_staged()`.
    pub use_staged_as_running: bool,
    /// Client-side stub table for the named subset of operations.
    pub mock_rpc: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let run_dir = default_run_dir();
        Self {
            state_dir: default_state_dir(),
            log_dir: default_log_dir(),
            socket_path: run_dir.join("control.sock"),
            run_dir,
            share_dir: default_share_dir(),
            test_mode: false,
            use_staged_as_running: false,
            mock_rpc: false,
        }
    }
}

impl Settings {
    /// Builds settings from the canonical `FLYWALL_*` environment variables,
    /// falling back to brand defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(dir) = env_path("STATE_DIR") {
            settings.state_dir = dir;
        }
        if let Some(dir) = env_path("LOG_DIR") {
            settings.log_dir = dir;
        }
        if let Some(dir) = env_path("RUN_DIR") {
            settings.run_dir = dir.clone();
            settings.socket_path = dir.join("control.sock");
        }
        if let Some(dir) = env_path("SHARE_DIR") {
            settings.share_dir = dir;
        }
        if let Some(sock) = env_path("CTL_SOCKET") {
            settings.socket_path = sock;
        }
        settings.test_mode = env_flag("TEST_MODE");
        settings.use_staged_as_running = env_flag("USE_STAGED_AS_RUNNING");
        settings.mock_rpc = env_flag("MOCK_RPC");

        settings.validate()?;
        Ok(settings)
    }

    /// Validates the resolved settings for logical consistency.
    pub fn validate(&self) -> Result<()> {
        for (name, dir) in [
            ("state_dir", &self.state_dir),
            ("log_dir", &self.log_dir),
            ("run_dir", &self.run_dir),
            ("share_dir", &self.share_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(anyhow!("{name} cannot be empty"));
            }
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(anyhow!("socket path cannot be empty"));
        }
        if self.socket_path.parent().is_none() {
            return Err(anyhow!(
                "socket path '{}' has no parent directory",
                self.socket_path.display()
            ));
        }
        Ok(())
    }

    // --- Derived paths ---

    /// Auth data store, mode 0600 inside a 0700 directory.
    pub fn auth_store_path(&self) -> PathBuf {
        self.state_dir.join("auth.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("flywall.conf")
    }

    /// Staged upgrade binary, written adjacent to the running binary's
    /// runtime dir with a fixed suffix.
    pub fn staged_binary_path(&self) -> PathBuf {
        self.run_dir.join("flywall_new")
    }

    pub fn handoff_path(&self) -> PathBuf {
        self.run_dir.join("handoff.json")
    }

    pub fn boot_marker_path(&self) -> PathBuf {
        self.run_dir.join("boot_attempts")
    }

    /// Points every directory at `root`, for tests and `--state-dir` runs.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            state_dir: root.join("state"),
            log_dir: root.join("log"),
            run_dir: root.join("run"),
            share_dir: root.join("share"),
            socket_path: root.join("run").join("control.sock"),
            test_mode: true,
            use_staged_as_running: false,
            mock_rpc: false,
        }
    }
}

fn env_path(suffix: &str) -> Option<PathBuf> {
    env::var(format!("{ENV_PREFIX}_{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn env_flag(suffix: &str) -> bool {
    env::var(format!("{ENV_PREFIX}_{suffix}"))
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
