// src/core/ops/system_ops.rs

//! Handlers for status, host imperatives, notification polling, and the
//! runtime log level.

use super::router::{parse_args, to_value};
use super::{
    Acked, NotificationsSinceArgs, PingArgs, PingReply, RestartServiceArgs, ScanNetworkArgs,
    SetLogLevelArgs, StatusReply, WakeOnLanArgs,
};
use crate::core::errors::FlywallError;
use crate::core::notifications::NotificationKind;
use crate::core::state::ServerState;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);
const SCAN_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn status(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let load = sysinfo::System::load_average();

    let reply = StatusReply {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        config_version: state.manager.version().await,
        safe_mode: state.is_in_safe_mode(),
        learning_mode: state
            .pipeline
            .effective_mode()
            .map(|mode| format!("{mode:?}").to_lowercase()),
        pending_rules: state.engine.list_rules().len(),
        tracked_flows: state.engine.list_flows().len(),
        upgrade_state: state.upgrade.state().await.to_string(),
        memory_used_bytes: system.used_memory(),
        memory_total_bytes: system.total_memory(),
        load_average_one: load.one,
        notifications_last_id: state.notifications.last_id(),
    };
    to_value(reply)
}

pub async fn notifications_since(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: NotificationsSinceArgs = parse_args(args)?;
    to_value(state.notifications.since(args.since_id))
}

pub async fn dhcp_leases(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let services = state.services().await;
    to_value(services.dhcp.leases().await?)
}

pub async fn dns_stats(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let services = state.services().await;
    to_value(services.dns.stats().await?)
}

pub async fn replication_status(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let services = state.services().await;
    to_value(services.replicator.status().await?)
}

pub async fn scheduler_tasks(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.scheduler.task_infos().await)
}

pub async fn restart_service(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: RestartServiceArgs = parse_args(args)?;
    let services = state.services().await;
    services.system.restart_service(&args.name).await?;
    to_value(Acked::yes())
}

pub async fn reboot(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let services = state.services().await;
    state.notifications.publish(
        NotificationKind::Warning,
        "Reboot Requested",
        "The host is rebooting.",
    );
    services.system.reboot().await?;
    to_value(Acked::yes())
}

pub async fn wake_on_lan(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: WakeOnLanArgs = parse_args(args)?;
    let services = state.services().await;
    services.system.wake_on_lan(&args.mac).await?;
    to_value(Acked::yes())
}

pub async fn ping(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: PingArgs = parse_args(args)?;
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_PING_TIMEOUT);
    let services = state.services().await;
    let rtt = services.system.ping(&args.host, timeout).await?;
    to_value(PingReply {
        host: args.host,
        rtt_ms: rtt.as_millis() as u64,
    })
}

/// Kicks off a network scan in the background; completion is announced
/// through the notification hub.
pub async fn start_scan_network(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: ScanNetworkArgs = parse_args(args)?;
    let services = state.services().await;
    let notifications = state.notifications.clone();
    let subnet = args.subnet.clone();
    tokio::spawn(async move {
        match tokio::time::timeout(SCAN_TIMEOUT, services.system.scan_network(&subnet)).await {
            Ok(Ok(results)) => {
                notifications.publish(
                    NotificationKind::Success,
                    "Network Scan Complete",
                    format!("Scan of {subnet} found {} hosts.", results.len()),
                );
            }
            Ok(Err(e)) => {
                warn!("network scan failed: {e}");
                notifications.publish(
                    NotificationKind::Error,
                    "Network Scan Failed",
                    format!("Scan of {subnet} failed: {e}"),
                );
            }
            Err(_) => {
                notifications.publish(
                    NotificationKind::Error,
                    "Network Scan Timed Out",
                    format!("Scan of {subnet} exceeded {} seconds.", SCAN_TIMEOUT.as_secs()),
                );
            }
        }
    });
    to_value(Acked::yes())
}

pub async fn set_log_level(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: SetLogLevelArgs = parse_args(args)?;
    let handle = state
        .log_reload_handle
        .as_ref()
        .ok_or_else(|| FlywallError::Unavailable("log reloading not configured".into()))?;
    let filter = args
        .level
        .parse::<EnvFilter>()
        .map_err(|e| FlywallError::Validation(format!("invalid log filter: {e}")))?;
    handle
        .reload(filter)
        .map_err(|e| FlywallError::Internal(format!("failed to reload log filter: {e}")))?;
    info!(level = %args.level, "log level changed");
    to_value(Acked::yes())
}
