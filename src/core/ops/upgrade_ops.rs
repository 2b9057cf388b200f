// src/core/ops/upgrade_ops.rs

//! Handlers for the hot-upgrade protocol.

use super::router::{parse_args, to_value};
use super::{Acked, StageBinaryArgs, UpgradeArgs};
use crate::core::errors::FlywallError;
use crate::core::notifications::NotificationKind;
use crate::core::state::ServerState;
use crate::core::upgrade::HandoffState;
use serde_json::Value;
use std::sync::Arc;

pub async fn stage_binary(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: StageBinaryArgs = parse_args(args)?;
    let data = hex::decode(&args.data_hex)
        .map_err(|e| FlywallError::InvalidRequest(format!("binary payload is not hex: {e}")))?;
    state
        .upgrade
        .stage_binary(&data, &args.checksum, &args.arch)
        .await?;
    state.notifications.publish(
        NotificationKind::Info,
        "Upgrade Staged",
        format!("A new binary ({} bytes) passed verification.", data.len()),
    );
    to_value(Acked::yes())
}

/// Re-verifies the staged binary and runs the handoff. The reply reaches
/// the caller before the delayed self-termination fires.
pub async fn upgrade(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: UpgradeArgs = parse_args(args)?;

    let handoff = HandoffState {
        config_text: state.manager.render_running().await?,
        socket_path: state.settings.socket_path.clone(),
        config_version: state.manager.version().await,
        old_pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let watchdog = state.services().await.watchdog.clone();
    let listener_fd = state.listener_fd();
    if listener_fd <= 0 {
        return Err(FlywallError::InvalidState(
            "no control listener to hand off".into(),
        ));
    }

    state
        .upgrade
        .upgrade(&args.checksum, handoff, listener_fd, watchdog)
        .await?;

    // The successor is up; release kernel-bound readers so it can bind
    // them, then schedule our own exit.
    state.scheduler.cancel_all();
    state.pipeline.stop().await;
    state.upgrade.finalize(state.shutdown_tx.clone()).await;

    state.notifications.publish(
        NotificationKind::Warning,
        "Upgrade Started",
        "Handoff to the new binary is in progress; this process will exit shortly.",
    );
    to_value(Acked::yes())
}
