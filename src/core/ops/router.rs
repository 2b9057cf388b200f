// src/core/ops/router.rs

//! Routes framed requests to per-method handlers.
//!
//! Every handler runs in its own task behind a recovery guard: a panicking
//! handler yields an `internal` error reply instead of tearing the process
//! down, and scoped lock acquisition inside the handlers means no lock
//! outlives the panic.

use super::{Method, backup_ops, config_ops, learning_ops, system_ops, upgrade_ops};
use crate::core::errors::FlywallError;
use crate::core::protocol::{RequestEnvelope, ResponseEnvelope};
use crate::core::state::ServerState;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Dispatches one request and always produces a reply envelope.
pub async fn dispatch(state: Arc<ServerState>, request: RequestEnvelope) -> ResponseEnvelope {
    let id = request.id;
    let method: Method = match request.method.parse() {
        Ok(method) => method,
        Err(_) => {
            return ResponseEnvelope::err(
                id,
                &FlywallError::UnknownMethod(request.method.clone()),
            );
        }
    };
    debug!(%method, id, "dispatching request");

    let guarded = tokio::spawn(route(state, method, request.args));
    match guarded.await {
        Ok(Ok(result)) => ResponseEnvelope::ok(id, result),
        Ok(Err(e)) => ResponseEnvelope::err(id, &e),
        Err(join_error) => {
            let e = if join_error.is_panic() {
                error!(%method, "handler panicked");
                FlywallError::Internal(format!("handler for '{method}' panicked"))
            } else {
                FlywallError::Internal(format!("handler for '{method}' was cancelled"))
            };
            ResponseEnvelope::err(id, &e)
        }
    }
}

async fn route(
    state: Arc<ServerState>,
    method: Method,
    args: Value,
) -> Result<Value, FlywallError> {
    match method {
        // Read-only
        Method::Status => system_ops::status(&state).await,
        Method::GetRunning => config_ops::get_running(&state).await,
        Method::GetStaged => config_ops::get_staged(&state).await,
        Method::GetSection => config_ops::get_section(&state, args).await,
        Method::ListInterfaces => config_ops::list_interfaces(&state).await,
        Method::DhcpLeases => system_ops::dhcp_leases(&state).await,
        Method::DnsStats => system_ops::dns_stats(&state).await,
        Method::ListBackups => backup_ops::list(&state).await,
        Method::NotificationsSince => system_ops::notifications_since(&state, args).await,
        Method::ReplicationStatus => system_ops::replication_status(&state).await,
        Method::ListPendingRules => learning_ops::list_pending_rules(&state).await,
        Method::ListFlows => learning_ops::list_flows(&state).await,
        Method::IsInSafeMode => config_ops::is_in_safe_mode(&state).await,
        Method::SchedulerTasks => system_ops::scheduler_tasks(&state).await,
        // Staging
        Method::SetRaw => config_ops::set_raw(&state, args).await,
        Method::SetSection => config_ops::set_section(&state, args).await,
        Method::DeleteSection => config_ops::delete_section(&state, args).await,
        Method::StageInterface => config_ops::stage_interface(&state, args).await,
        Method::DeleteInterface => config_ops::delete_interface(&state, args).await,
        Method::UpsertAlertRule => config_ops::upsert_alert_rule(&state, args).await,
        // Applying
        Method::ApplyConfig => config_ops::apply_config(&state).await,
        Method::DiscardConfig => config_ops::discard_config(&state).await,
        Method::CreateBackup => backup_ops::create(&state, args).await,
        Method::RestoreBackup => backup_ops::restore(&state, args).await,
        Method::PinBackup => backup_ops::pin(&state, args).await,
        Method::DeleteBackup => backup_ops::delete(&state, args).await,
        Method::SafeApplyInterface => config_ops::safe_apply_interface(&state, args).await,
        Method::ConfirmApply => config_ops::confirm_apply(&state, args).await,
        Method::CancelApply => config_ops::cancel_apply(&state, args).await,
        // Imperative
        Method::RestartService => system_ops::restart_service(&state, args).await,
        Method::Reboot => system_ops::reboot(&state).await,
        Method::WakeOnLan => system_ops::wake_on_lan(&state, args).await,
        Method::Ping => system_ops::ping(&state, args).await,
        Method::StartScanNetwork => system_ops::start_scan_network(&state, args).await,
        // Learning
        Method::ApproveRule
        | Method::DenyRule
        | Method::IgnoreRule
        | Method::DeleteRule
        | Method::ApproveFlow
        | Method::DenyFlow
        | Method::DeleteFlow => learning_ops::transition(&state, method, args).await,
        // Upgrade
        Method::StageBinary => upgrade_ops::stage_binary(&state, args).await,
        Method::Upgrade => upgrade_ops::upgrade(&state, args).await,
        // Safe mode
        Method::EnterSafeMode => config_ops::enter_safe_mode(&state).await,
        Method::ExitSafeMode => config_ops::exit_safe_mode(&state).await,
        // Logging
        Method::SetLogLevel => system_ops::set_log_level(&state, args).await,
    }
}

/// Deserializes a handler's argument blob with a `validation` error on
/// mismatch.
pub(super) fn parse_args<T: serde::de::DeserializeOwned>(
    args: Value,
) -> Result<T, FlywallError> {
    serde_json::from_value(args)
        .map_err(|e| FlywallError::InvalidRequest(format!("bad arguments: {e}")))
}

/// Serializes a handler's reply.
pub(super) fn to_value<T: serde::Serialize>(value: T) -> Result<Value, FlywallError> {
    Ok(serde_json::to_value(value)?)
}
