// src/core/ops/reconcile.rs

//! Apply orchestration: promotes the staged config through the manager,
//! then reconciles everything that hangs off the running config —
//! scheduler tasks, dynamic rule sets, uplink monitors, learning settings —
//! and publishes the outcome notification.

use crate::core::errors::FlywallError;
use crate::core::manager::ApplyReport;
use crate::core::model::{Config, ScheduleAction};
use crate::core::notifications::NotificationKind;
use crate::core::scheduler::{IPSET_PREFIX, MANAGED_PREFIXES, RULE_PREFIX, SYSTEM_PREFIX, TaskFn};
use crate::core::state::ServerState;
use std::sync::Arc;
use tracing::warn;

/// Runs a full apply. Promotion always completes; the report says whether
/// a critical hook failed.
pub async fn apply_and_reconcile(state: &Arc<ServerState>) -> Result<ApplyReport, FlywallError> {
    let report = state.manager.apply().await?;
    let config = state.manager.get_running().await;

    state.engine.reconfigure(config.learning.clone());

    // In safe mode only the minimal built-in policy is active; dependent
    // subsystems are left alone until the operator exits safe mode.
    if !state.is_in_safe_mode() {
        reconcile_tasks(state, &config).await;
        let services = state.services().await;
        if let Err(e) = services.ipset.sync(&config).await {
            warn!("ipset reconciliation failed: {e}");
        }
        if let Err(e) = services.uplinks.reconcile(&config).await {
            warn!("uplink reconciliation failed: {e}");
        }
    }

    publish_outcome(state, &report);
    Ok(report)
}

fn publish_outcome(state: &Arc<ServerState>, report: &ApplyReport) {
    if report.critical_failed {
        let failed: Vec<&str> = report
            .partial_failures
            .iter()
            .filter(|f| f.critical)
            .map(|f| f.name.as_str())
            .collect();
        state.notifications.publish(
            NotificationKind::Error,
            "Configuration Apply Failed",
            format!(
                "Critical subsystem reload failed: {}. The configuration was promoted; investigate before retrying.",
                failed.join(", ")
            ),
        );
    } else if !report.partial_failures.is_empty() {
        let failed: Vec<&str> = report
            .partial_failures
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        state.notifications.publish(
            NotificationKind::Warning,
            "Configuration Applied with Warnings",
            format!("Some subsystems failed to reload: {}.", failed.join(", ")),
        );
    } else {
        state.notifications.publish(
            NotificationKind::Success,
            "Configuration Applied",
            format!("Configuration version {} is now running.", report.version),
        );
    }
}

/// Wipe-and-rebuild reconciliation of every managed task prefix. Task ids
/// derive deterministically from config keys, so running this twice for
/// the same config yields the same task set.
pub async fn reconcile_tasks(state: &Arc<ServerState>, config: &Config) {
    for prefix in MANAGED_PREFIXES {
        state.scheduler.remove_prefix(prefix).await;
    }

    let services = state.services().await;

    for (name, rule) in &config.schedules {
        let id = format!("{RULE_PREFIX}{name}");
        let firewall = services.firewall.clone();
        let policy = rule.policy.clone();
        let enable = rule.action == ScheduleAction::Enable;
        let func: TaskFn = Arc::new(move |_cancel| {
            let firewall = firewall.clone();
            let policy = policy.clone();
            Box::pin(async move { firewall.set_policy_enabled(&policy, enable).await })
        });
        if state
            .scheduler
            .add_parsed(&id, &rule.schedule, rule.enabled, func)
            .await
            .is_err()
        {
            // Already logged; a bad schedule never blocks the rest.
            continue;
        }
    }

    for (name, ipset) in &config.ipsets {
        let Some(refresh) = &ipset.refresh else {
            continue;
        };
        let id = format!("{IPSET_PREFIX}{name}");
        let service = services.ipset.clone();
        let set_name = name.clone();
        let func: TaskFn = Arc::new(move |_cancel| {
            let service = service.clone();
            let set_name = set_name.clone();
            Box::pin(async move { service.refresh(&set_name).await })
        });
        let _ = state.scheduler.add_parsed(&id, refresh, true, func).await;
    }

    if let Some(schedule) = &config.backups.auto_schedule {
        let id = format!("{SYSTEM_PREFIX}backup");
        let manager = state.manager.clone();
        let backups = state.backups.clone();
        let max_backups = config.backups.max_backups;
        let func: TaskFn = Arc::new(move |_cancel| {
            let manager = manager.clone();
            let backups = backups.clone();
            Box::pin(async move {
                let contents = manager.render_running().await?;
                backups
                    .create(&contents, "scheduled backup", true, max_backups)
                    .await?;
                Ok(())
            })
        });
        let _ = state.scheduler.add_parsed(&id, schedule, true, func).await;
    }
}
