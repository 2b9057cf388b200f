// src/server/initialization.rs

//! Handles the complete server initialization process: state setup,
//! crash-loop detection, and the control listener (freshly bound or
//! inherited from a predecessor during hot upgrade).

use super::context::ServerContext;
use crate::config::{SOCKET_DIR_MODE, SOCKET_MODE, Settings};
use crate::core::services::Services;
use crate::core::state::ServerState;
use crate::core::upgrade::{HANDOFF_FD_ENV, read_handoff};
use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Restarts inside this window count towards crash-loop detection.
const CRASH_LOOP_WINDOW: Duration = Duration::from_secs(60);
const CRASH_LOOP_THRESHOLD: usize = 3;

/// Initializes all server components before starting the main loop.
pub async fn setup(
    settings: Settings,
    services: Services,
    log_reload_handle: Option<Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>>,
) -> Result<ServerContext> {
    tokio::fs::create_dir_all(&settings.state_dir).await?;
    tokio::fs::create_dir_all(&settings.run_dir).await?;

    let state = ServerState::initialize(settings.clone(), services.clone(), log_reload_handle)
        .await
        .context("failed to initialize server state")?;
    register_apply_hooks(&state, &services);

    if settings.test_mode {
        info!("test mode: crash-loop detection skipped");
    } else if detect_crash_loop(&settings).await? {
        warn!("crash loop detected, entering safe mode");
        state.set_safe_mode(true);
        state.notifications.publish(
            crate::core::notifications::NotificationKind::Warning,
            "Safe Mode Entered",
            "Repeated restarts detected; running the minimal built-in policy.",
        );
    }

    let listener = match inherited_listener(&settings).await {
        Some(listener) => {
            info!("resuming service on listener inherited from predecessor");
            listener
        }
        None => {
            let listener = bind_listener(&settings)?;
            let socket_group = state.manager.get_running().await.api.socket_group;
            if let Some(group) = socket_group
                && let Err(e) = apply_socket_group(&settings.socket_path, &group)
            {
                warn!(group, "failed to set control socket group: {e}");
            }
            listener
        }
    };
    state.set_listener_fd(listener.as_raw_fd());

    let shutdown_tx = state.shutdown_tx.clone();
    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Rebuilds the control listener from the fd a predecessor passed down,
/// if this process was started as an upgrade successor.
async fn inherited_listener(settings: &Settings) -> Option<UnixListener> {
    let fd: RawFd = std::env::var(HANDOFF_FD_ENV).ok()?.parse().ok()?;
    if fd <= 2 {
        warn!(fd, "ignoring implausible handoff fd");
        return None;
    }
    if let Some(handoff) = read_handoff(&settings.handoff_path()).await {
        info!(
            old_pid = handoff.old_pid,
            from_version = %handoff.version,
            "read handoff state from predecessor"
        );
    }
    let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) };
    if let Err(e) = std_listener.set_nonblocking(true) {
        warn!("inherited listener unusable: {e}");
        return None;
    }
    match UnixListener::from_std(std_listener) {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!("inherited listener unusable: {e}");
            None
        }
    }
}

/// Binds a fresh listener with restrictive permissions. Unprivileged
/// access goes through the socket group, never a loose mode.
fn bind_listener(settings: &Settings) -> Result<UnixListener> {
    let path = &settings.socket_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(SOCKET_DIR_MODE))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed stale control socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("failed to remove stale control socket"),
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind control socket at '{}'", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!(path = %path.display(), mode = format_args!("{SOCKET_MODE:o}"), "control socket listening");
    Ok(listener)
}

/// Registers the subsystem reload hooks, once, in the order they must run:
/// network changes first, then the critical kernel-facing reloads, then
/// the best-effort service reloads.
fn register_apply_hooks(state: &Arc<ServerState>, services: &Services) {
    use crate::core::manager::ApplyHook;

    let network = services.network.clone();
    state.manager.register_hook(ApplyHook::new("network", true, move |config| {
        let network = network.clone();
        Box::pin(async move { network.apply(&config).await })
    }));

    let firewall = services.firewall.clone();
    state.manager.register_hook(ApplyHook::new("firewall", true, move |config| {
        let firewall = firewall.clone();
        Box::pin(async move { firewall.reload(&config).await })
    }));

    let routing = services.routing.clone();
    state.manager.register_hook(ApplyHook::new("policy_routing", true, move |config| {
        let routing = routing.clone();
        Box::pin(async move { routing.apply(&config).await })
    }));

    let dhcp = services.dhcp.clone();
    state.manager.register_hook(ApplyHook::new("dhcp", false, move |config| {
        let dhcp = dhcp.clone();
        Box::pin(async move { dhcp.reload(&config).await })
    }));

    let dns = services.dns.clone();
    state.manager.register_hook(ApplyHook::new("dns", false, move |config| {
        let dns = dns.clone();
        Box::pin(async move { dns.reload(&config).await })
    }));
}

/// Hands socket group ownership to the configured unprivileged group so
/// its members can talk to the control plane without loosening the mode.
fn apply_socket_group(path: &std::path::Path, group: &str) -> Result<()> {
    use std::ffi::CString;

    let group_name = CString::new(group).context("group name contains a NUL byte")?;
    let entry = unsafe { libc::getgrnam(group_name.as_ptr()) };
    if entry.is_null() {
        anyhow::bail!("group '{group}' does not exist");
    }
    let gid = unsafe { (*entry).gr_gid };

    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .context("socket path contains a NUL byte")?;
    if unsafe { libc::chown(c_path.as_ptr(), u32::MAX, gid) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("chown of '{}' failed", path.display()));
    }
    info!(group, gid, "control socket group applied");
    Ok(())
}

/// Appends a boot timestamp to the marker file and reports whether too
/// many boots landed inside the window.
async fn detect_crash_loop(settings: &Settings) -> Result<bool> {
    let marker = settings.boot_marker_path();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut stamps: Vec<u64> = match tokio::fs::read_to_string(&marker).await {
        Ok(contents) => contents
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    stamps.retain(|&stamp| now.saturating_sub(stamp) <= CRASH_LOOP_WINDOW.as_secs());
    stamps.push(now);

    let contents: String = stamps
        .iter()
        .map(|stamp| format!("{stamp}\n"))
        .collect();
    tokio::fs::write(&marker, contents).await?;

    Ok(stamps.len() >= CRASH_LOOP_THRESHOLD)
}
