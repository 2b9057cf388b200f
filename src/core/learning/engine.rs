// src/core/learning/engine.rs

//! The learning engine: in-memory flow and pending-rule tables, a
//! non-blocking ingest path for async mode, and a synchronous decision
//! path for inline mode.
//!
//! The inline path is called inside the kernel's queue timeout and
//! therefore touches nothing but these tables.

use super::pending::{FlowRecord, PendingRule, RuleState};
use crate::core::errors::FlywallError;
use crate::core::model::LearningConfig;
use crate::core::verdict::{EngineVerdict, PacketInfo};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Approved flows are marked for kernel offload once they have been seen
/// this many times; before that the engine keeps counting them.
pub const OFFLOAD_AFTER_PACKETS: u64 = 8;

#[derive(Debug)]
pub struct LearningEngine {
    rules: DashMap<u64, PendingRule>,
    rules_by_fingerprint: DashMap<String, u64>,
    flows: DashMap<u64, FlowRecord>,
    flows_by_fingerprint: DashMap<String, u64>,
    next_id: AtomicU64,
    settings: RwLock<LearningConfig>,
}

impl LearningEngine {
    pub fn new(settings: LearningConfig) -> Self {
        Self {
            rules: DashMap::new(),
            rules_by_fingerprint: DashMap::new(),
            flows: DashMap::new(),
            flows_by_fingerprint: DashMap::new(),
            next_id: AtomicU64::new(1),
            settings: RwLock::new(settings),
        }
    }

    /// Applies new learning settings on config apply.
    pub fn reconfigure(&self, settings: LearningConfig) {
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> LearningConfig {
        self.settings.read().clone()
    }

    /// Stable key for the packet tuple a rule proposal covers.
    pub fn fingerprint(packet: &PacketInfo) -> String {
        format!(
            "{}:{}>{}:{}",
            packet.protocol, packet.src_ip, packet.dst_ip, packet.dst_port
        )
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Non-blocking observation path for async mode. Updates the flow
    /// table and creates a pending rule for the first packet of an
    /// unknown tuple. First-packet-of-flow may be unclassified; no verdict
    /// is produced here.
    pub fn ingest_packet(&self, packet: PacketInfo) {
        let fingerprint = Self::fingerprint(&packet);
        let now = Utc::now();

        let flow_id = self.flows_by_fingerprint.get(&fingerprint).map(|r| *r);
        match flow_id {
            Some(id) => {
                if let Some(mut flow) = self.flows.get_mut(&id) {
                    flow.packets += 1;
                    flow.last_seen = now;
                }
            }
            None => {
                let id = self.alloc_id();
                self.flows.insert(
                    id,
                    FlowRecord {
                        id,
                        fingerprint: fingerprint.clone(),
                        packet: packet.clone(),
                        state: RuleState::Pending,
                        acted_by: None,
                        first_seen: now,
                        last_seen: now,
                        packets: 1,
                    },
                );
                self.flows_by_fingerprint.insert(fingerprint.clone(), id);
            }
        }

        let rule_id = self.rules_by_fingerprint.get(&fingerprint).map(|r| *r);
        match rule_id {
            Some(id) => {
                if let Some(mut rule) = self.rules.get_mut(&id) {
                    rule.hits += 1;
                    rule.last_seen = now;
                }
            }
            None => {
                let limit = self.settings.read().pending_limit;
                let pending = self
                    .rules
                    .iter()
                    .filter(|r| r.state == RuleState::Pending)
                    .count();
                if pending >= limit {
                    debug!(fingerprint, "pending rule limit reached, not learning");
                    return;
                }
                let id = self.alloc_id();
                self.rules.insert(
                    id,
                    PendingRule {
                        id,
                        fingerprint: fingerprint.clone(),
                        packet,
                        state: RuleState::Pending,
                        acted_by: None,
                        first_seen: now,
                        last_seen: now,
                        hits: 1,
                    },
                );
                self.rules_by_fingerprint.insert(fingerprint, id);
            }
        }
    }

    /// Synchronous decision path for inline mode. Consults only the
    /// in-memory rule table; unknown tuples are learned and inspected.
    pub fn process_packet_inline(
        &self,
        packet: PacketInfo,
    ) -> Result<EngineVerdict, FlywallError> {
        let fingerprint = Self::fingerprint(&packet);
        let rule_id = self.rules_by_fingerprint.get(&fingerprint).map(|r| *r);
        let rule_state =
            rule_id.and_then(|id| self.rules.get(&id).map(|r| (r.state, r.hits)));

        // Count the packet against flow/rule tables regardless of verdict.
        self.ingest_packet(packet);

        match rule_state {
            Some((RuleState::Approved, hits)) => {
                if hits >= OFFLOAD_AFTER_PACKETS {
                    Ok(EngineVerdict::Offload)
                } else {
                    Ok(EngineVerdict::Allow)
                }
            }
            Some((RuleState::Denied, _)) => Ok(EngineVerdict::Drop),
            Some((RuleState::Pending | RuleState::Ignored | RuleState::Deleted, _)) | None => {
                Ok(EngineVerdict::Inspect)
            }
        }
    }

    // --- Pending rule transitions ---

    pub fn transition_rule(
        &self,
        id: u64,
        target: RuleState,
        acted_by: Option<&str>,
    ) -> Result<PendingRule, FlywallError> {
        let mut rule = self
            .rules
            .get_mut(&id)
            .ok_or_else(|| FlywallError::NotFound(format!("pending rule {id}")))?;
        let (next, changed) = rule.state.transition_to(target);
        if changed {
            rule.state = next;
            if matches!(next, RuleState::Approved | RuleState::Denied) {
                rule.acted_by = acted_by.map(str::to_string);
            }
            debug!(id, state = %next, "pending rule transitioned");
        }
        Ok(rule.clone())
    }

    pub fn transition_flow(
        &self,
        id: u64,
        target: RuleState,
        acted_by: Option<&str>,
    ) -> Result<FlowRecord, FlywallError> {
        let mut flow = self
            .flows
            .get_mut(&id)
            .ok_or_else(|| FlywallError::NotFound(format!("flow {id}")))?;
        let (next, changed) = flow.state.transition_to(target);
        if changed {
            flow.state = next;
            if matches!(next, RuleState::Approved | RuleState::Denied) {
                flow.acted_by = acted_by.map(str::to_string);
            }
            debug!(id, state = %next, "flow transitioned");
        }
        Ok(flow.clone())
    }

    pub fn list_rules(&self) -> Vec<PendingRule> {
        let mut rules: Vec<PendingRule> = self
            .rules
            .iter()
            .filter(|r| r.state != RuleState::Deleted)
            .map(|r| r.clone())
            .collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    pub fn list_flows(&self) -> Vec<FlowRecord> {
        let mut flows: Vec<FlowRecord> = self
            .flows
            .iter()
            .filter(|f| f.state != RuleState::Deleted)
            .map(|f| f.clone())
            .collect();
        flows.sort_by_key(|f| f.id);
        flows
    }

    pub fn get_rule(&self, id: u64) -> Option<PendingRule> {
        self.rules.get(&id).map(|r| r.clone())
    }
}
