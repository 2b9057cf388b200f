// src/core/ops/learning_ops.rs

//! Handlers for pending-rule and flow decisions.

use super::router::{parse_args, to_value};
use super::{Method, RuleActionArgs};
use crate::core::errors::FlywallError;
use crate::core::learning::RuleState;
use crate::core::notifications::NotificationKind;
use crate::core::state::ServerState;
use serde_json::Value;
use std::sync::Arc;

pub async fn list_pending_rules(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.engine.list_rules())
}

pub async fn list_flows(state: &Arc<ServerState>) -> Result<Value, FlywallError> {
    to_value(state.engine.list_flows())
}

/// One entry point for all seven decision methods; the target state and
/// artifact kind fall out of the method name.
pub async fn transition(
    state: &Arc<ServerState>,
    method: Method,
    args: Value,
) -> Result<Value, FlywallError> {
    let args: RuleActionArgs = parse_args(args)?;
    let user = args.user.as_deref();

    let (target, is_flow) = match method {
        Method::ApproveRule => (RuleState::Approved, false),
        Method::DenyRule => (RuleState::Denied, false),
        Method::IgnoreRule => (RuleState::Ignored, false),
        Method::DeleteRule => (RuleState::Deleted, false),
        Method::ApproveFlow => (RuleState::Approved, true),
        Method::DenyFlow => (RuleState::Denied, true),
        Method::DeleteFlow => (RuleState::Deleted, true),
        _ => {
            return Err(FlywallError::Internal(format!(
                "'{method}' is not a learning transition"
            )));
        }
    };

    if is_flow {
        let flow = state.engine.transition_flow(args.id, target, user)?;
        to_value(flow)
    } else {
        let rule = state.engine.transition_rule(args.id, target, user)?;
        if matches!(target, RuleState::Approved | RuleState::Denied) {
            let verb = if target == RuleState::Approved {
                "approved"
            } else {
                "denied"
            };
            state.notifications.publish(
                NotificationKind::Info,
                "Learning Rule Decision",
                format!(
                    "Rule {} ({}) {verb}{}.",
                    rule.id,
                    rule.fingerprint,
                    user.map(|u| format!(" by {u}")).unwrap_or_default()
                ),
            );
        }
        to_value(rule)
    }
}
