// src/core/ops/backup_ops.rs

//! Handlers for backup create/list/restore and retention pinning.

use super::reconcile::apply_and_reconcile;
use super::router::{parse_args, to_value};
use super::{Acked, BackupVersionArgs, CreateBackupArgs, PinBackupArgs};
use crate::core::errors::FlywallError;
use crate::core::notifications::NotificationKind;
use crate::core::state::ServerState;
use serde_json::Value;
use std::sync::Arc;

pub async fn list(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.backups.list().await)
}

pub async fn create(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: CreateBackupArgs = parse_args(args)?;
    let contents = state.manager.render_running().await?;
    let max_backups = state.manager.get_running().await.backups.max_backups;
    let record = state
        .backups
        .create(&contents, &args.description, false, max_backups)
        .await?;
    state.notifications.publish(
        NotificationKind::Success,
        "Backup Created",
        format!("Backup {} ({}) saved.", record.version, record.description),
    );
    to_value(record)
}

/// Restores a backup by staging its contents and applying in one motion.
pub async fn restore(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: BackupVersionArgs = parse_args(args)?;
    let contents = state.backups.read(args.version).await?;
    state.manager.set_raw(&contents).await?;
    let report = apply_and_reconcile(state).await?;
    if report.critical_failed {
        return Err(FlywallError::HookFailed {
            name: "restore_backup".into(),
            message: format!("backup {} applied with critical failures", args.version),
        });
    }
    state.notifications.publish(
        NotificationKind::Success,
        "Backup Restored",
        format!("Backup {} is now the running configuration.", args.version),
    );
    to_value(report)
}

pub async fn pin(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: PinBackupArgs = parse_args(args)?;
    let record = state.backups.set_pinned(args.version, args.pinned).await?;
    to_value(record)
}

pub async fn delete(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: BackupVersionArgs = parse_args(args)?;
    state.backups.delete(args.version).await?;
    to_value(Acked::yes())
}
