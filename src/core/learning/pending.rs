// src/core/learning/pending.rs

//! Learning artifacts and their one-way state machine.
//!
//! `pending → (approved | denied | ignored) → deleted`. Transitions are
//! idempotent: once a rule left `pending`, every transition except
//! `deleted` is a no-op, and `deleted` is terminal.

use crate::core::verdict::PacketInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleState {
    Pending,
    Approved,
    Denied,
    Ignored,
    Deleted,
}

impl RuleState {
    /// Computes the state after a requested transition. Returns the new
    /// state and whether anything changed.
    pub fn transition_to(self, target: RuleState) -> (RuleState, bool) {
        match (self, target) {
            (current, target) if current == target => (current, false),
            (RuleState::Pending, target) => (target, true),
            (RuleState::Deleted, _) => (RuleState::Deleted, false),
            (_, RuleState::Deleted) => (RuleState::Deleted, true),
            // Approved/denied/ignored never move sideways.
            (current, _) => (current, false),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RuleState::Deleted
    }
}

/// A rule the learning engine proposed from observed traffic, awaiting an
/// operator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRule {
    pub id: u64,
    /// Stable key derived from the packet tuple.
    pub fingerprint: String,
    pub packet: PacketInfo,
    pub state: RuleState,
    /// Operator who approved or denied the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acted_by: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hits: u64,
}

/// A tracked flow; shares the rule state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: u64,
    pub fingerprint: String,
    pub packet: PacketInfo,
    pub state: RuleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acted_by: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub packets: u64,
}
