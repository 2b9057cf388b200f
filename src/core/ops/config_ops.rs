// src/core/ops/config_ops.rs

//! Handlers for configuration reads, staging edits, apply/discard, the
//! safe-apply protocol, and safe mode.

use super::reconcile::apply_and_reconcile;
use super::router::{parse_args, to_value};
use super::{
    Acked, ApplySessionArgs, DeleteInterfaceArgs, InterfaceSummary, SafeApplyInterfaceArgs,
    SafeApplyReply, SectionRef, SetRawArgs, SetSectionArgs, StageInterfaceArgs,
    UpsertAlertRuleArgs,
};
use crate::core::errors::FlywallError;
use crate::core::notifications::NotificationKind;
use crate::core::safe_apply::DEFAULT_ROLLBACK_DELAY;
use crate::core::state::ServerState;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub async fn get_running(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.manager.get_running().await)
}

pub async fn get_staged(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.manager.get_staged().await)
}

pub async fn get_section(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: SectionRef = parse_args(args)?;
    let body = state
        .manager
        .get_section(&args.kind, args.label.as_deref())
        .await?;
    to_value(body)
}

pub async fn list_interfaces(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let config = state.manager.get_running().await;
    let interfaces: Vec<InterfaceSummary> = config
        .interfaces
        .iter()
        .map(|(name, iface)| InterfaceSummary {
            name: name.clone(),
            kind: iface.kind,
            ipv4: iface.ipv4.clone(),
            zone: iface.zone.clone(),
            enabled: iface.enabled,
        })
        .collect();
    to_value(interfaces)
}

pub async fn set_raw(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: SetRawArgs = parse_args(args)?;
    state.manager.set_raw(&args.contents).await?;
    to_value(Acked::yes())
}

pub async fn set_section(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: SetSectionArgs = parse_args(args)?;
    state
        .manager
        .set_section(&args.kind, args.label.as_deref(), &args.body)
        .await?;
    to_value(Acked::yes())
}

pub async fn delete_section(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: SectionRef = parse_args(args)?;
    state
        .manager
        .delete_section(&args.kind, args.label.as_deref())
        .await?;
    to_value(Acked::yes())
}

pub async fn stage_interface(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: StageInterfaceArgs = parse_args(args)?;
    state
        .manager
        .stage(move |config| {
            config.interfaces.insert(args.name, args.interface);
            Ok(())
        })
        .await?;
    to_value(Acked::yes())
}

pub async fn delete_interface(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: DeleteInterfaceArgs = parse_args(args)?;
    state
        .manager
        .stage(move |config| {
            if config.interfaces.shift_remove(&args.name).is_none() {
                return Err(FlywallError::NotFound(format!("interface {}", args.name)));
            }
            Ok(())
        })
        .await?;
    to_value(Acked::yes())
}

pub async fn upsert_alert_rule(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: UpsertAlertRuleArgs = parse_args(args)?;
    state
        .manager
        .stage(move |config| {
            config.alerts.insert(args.name, args.rule);
            Ok(())
        })
        .await?;
    to_value(Acked::yes())
}

pub async fn apply_config(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    let report = apply_and_reconcile(state).await?;
    if report.critical_failed {
        let failure = report
            .partial_failures
            .iter()
            .find(|f| f.critical)
            .cloned()
            .expect("critical_failed implies a critical failure entry");
        return Err(FlywallError::HookFailed {
            name: failure.name,
            message: failure.message,
        });
    }
    to_value(report)
}

pub async fn discard_config(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    state.manager.rollback().await?;
    state.notifications.publish(
        NotificationKind::Info,
        "Staged Changes Discarded",
        "The staged configuration was reset to the running configuration.",
    );
    to_value(Acked::yes())
}

/// Stage and apply an interface change with an armed reversion. The reply
/// carries the session id the caller must confirm within the window.
pub async fn safe_apply_interface(
    state: &Arc<ServerState>,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: SafeApplyInterfaceArgs = parse_args(args)?;
    let prior = state.manager.get_running().await;
    let delay = args
        .rollback_delay_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| {
            let configured = prior.api.safe_apply_rollback_delay;
            if configured.is_zero() {
                DEFAULT_ROLLBACK_DELAY
            } else {
                configured
            }
        });

    let name = args.name.clone();
    state
        .manager
        .stage(move |config| {
            config.interfaces.insert(name, args.interface);
            Ok(())
        })
        .await?;
    let report = apply_and_reconcile(state).await?;
    if report.critical_failed {
        // The apply itself failed; revert immediately rather than arming.
        state.manager.rollback().await?;
        return Err(FlywallError::HookFailed {
            name: "safe_apply".into(),
            message: "critical hook failed during safe apply; reverted".into(),
        });
    }

    let id = state.safe_apply.arm(
        state.manager.clone(),
        state.notifications.clone(),
        prior,
        delay,
    );
    to_value(SafeApplyReply {
        id,
        rollback_delay_secs: delay.as_secs(),
    })
}

pub async fn confirm_apply(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: ApplySessionArgs = parse_args(args)?;
    state.safe_apply.confirm(args.id)?;
    to_value(Acked::yes())
}

pub async fn cancel_apply(state: &Arc<ServerState>, args: Value) -> Result<Value, FlywallError> {
    let args: ApplySessionArgs = parse_args(args)?;
    state
        .safe_apply
        .cancel(args.id, &state.manager, &state.notifications)
        .await?;
    to_value(Acked::yes())
}

pub async fn is_in_safe_mode(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.is_in_safe_mode())
}

pub async fn enter_safe_mode(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    if !state.is_in_safe_mode() {
        state.set_safe_mode(true);
        state.notifications.publish(
            NotificationKind::Warning,
            "Safe Mode Entered",
            "The firewall is running the minimal built-in policy.",
        );
    }
    to_value(Acked::yes())
}

pub async fn exit_safe_mode(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    if state.is_in_safe_mode() {
        state.set_safe_mode(false);
        state.notifications.publish(
            NotificationKind::Info,
            "Safe Mode Exited",
            "Normal policy enforcement resumed.",
        );
        // Re-run reconciliation so the config-derived state catches up.
        apply_and_reconcile(state).await?;
    }
    to_value(Acked::yes())
}
