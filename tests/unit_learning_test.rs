use flywall::core::learning::{LearningEngine, OFFLOAD_AFTER_PACKETS, RuleState};
use flywall::core::model::LearningConfig;
use flywall::core::verdict::{EngineVerdict, PacketInfo};

fn packet(dst_port: u16) -> PacketInfo {
    PacketInfo {
        src_mac: "aa:bb:cc:dd:ee:ff".to_string(),
        src_ip: "10.0.0.50".parse().unwrap(),
        dst_ip: "93.184.216.34".parse().unwrap(),
        dst_port,
        protocol: "tcp".to_string(),
        interface: "eth0".to_string(),
        policy_tag: None,
    }
}

fn engine() -> LearningEngine {
    LearningEngine::new(LearningConfig::default())
}

#[test]
fn test_first_packet_creates_pending_rule_and_flow() {
    let engine = engine();
    engine.ingest_packet(packet(443));

    let rules = engine.list_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].state, RuleState::Pending);
    assert_eq!(rules[0].hits, 1);
    assert_eq!(engine.list_flows().len(), 1);
}

#[test]
fn test_repeat_packets_count_hits_not_rules() {
    let engine = engine();
    for _ in 0..5 {
        engine.ingest_packet(packet(443));
    }
    let rules = engine.list_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].hits, 5);
}

#[test]
fn test_rule_transitions_are_one_way_and_idempotent() {
    let engine = engine();
    engine.ingest_packet(packet(443));
    let id = engine.list_rules()[0].id;

    let approved = engine
        .transition_rule(id, RuleState::Approved, Some("alice"))
        .unwrap();
    assert_eq!(approved.state, RuleState::Approved);
    assert_eq!(approved.acted_by.as_deref(), Some("alice"));

    // Re-approving is a no-op, including the acting user.
    let again = engine
        .transition_rule(id, RuleState::Approved, Some("bob"))
        .unwrap();
    assert_eq!(again.acted_by.as_deref(), Some("alice"));

    // Denying an approved rule is a no-op.
    let denied = engine
        .transition_rule(id, RuleState::Denied, Some("bob"))
        .unwrap();
    assert_eq!(denied.state, RuleState::Approved);

    // Delete is always reachable and terminal.
    let deleted = engine
        .transition_rule(id, RuleState::Deleted, None)
        .unwrap();
    assert_eq!(deleted.state, RuleState::Deleted);
    let still_deleted = engine
        .transition_rule(id, RuleState::Approved, None)
        .unwrap();
    assert_eq!(still_deleted.state, RuleState::Deleted);
}

#[test]
fn test_transition_unknown_rule_is_not_found() {
    let engine = engine();
    assert!(engine.transition_rule(999, RuleState::Approved, None).is_err());
}

#[test]
fn test_inline_unknown_tuple_is_inspected_and_learned() {
    let engine = engine();
    let verdict = engine.process_packet_inline(packet(8443)).unwrap();
    assert_eq!(verdict, EngineVerdict::Inspect);
    assert_eq!(engine.list_rules().len(), 1);
}

#[test]
fn test_inline_denied_rule_drops() {
    let engine = engine();
    engine.ingest_packet(packet(23));
    let id = engine.list_rules()[0].id;
    engine
        .transition_rule(id, RuleState::Denied, Some("alice"))
        .unwrap();

    let verdict = engine.process_packet_inline(packet(23)).unwrap();
    assert_eq!(verdict, EngineVerdict::Drop);
}

#[test]
fn test_inline_approved_rule_allows_then_offloads() {
    let engine = engine();
    engine.ingest_packet(packet(443));
    let id = engine.list_rules()[0].id;
    engine
        .transition_rule(id, RuleState::Approved, Some("alice"))
        .unwrap();

    let verdict = engine.process_packet_inline(packet(443)).unwrap();
    assert_eq!(verdict, EngineVerdict::Allow);

    for _ in 0..OFFLOAD_AFTER_PACKETS {
        engine.process_packet_inline(packet(443)).unwrap();
    }
    let verdict = engine.process_packet_inline(packet(443)).unwrap();
    assert_eq!(verdict, EngineVerdict::Offload);
}

#[test]
fn test_pending_limit_stops_learning_new_tuples() {
    let engine = LearningEngine::new(LearningConfig {
        pending_limit: 2,
        ..LearningConfig::default()
    });
    for port in [1000, 1001, 1002, 1003] {
        engine.ingest_packet(packet(port));
    }
    assert_eq!(engine.list_rules().len(), 2);
    // Flows are still tracked past the rule limit.
    assert_eq!(engine.list_flows().len(), 4);
}

#[test]
fn test_flow_transitions_share_the_state_machine() {
    let engine = engine();
    engine.ingest_packet(packet(443));
    let flow_id = engine.list_flows()[0].id;

    let denied = engine
        .transition_flow(flow_id, RuleState::Denied, Some("ops"))
        .unwrap();
    assert_eq!(denied.state, RuleState::Denied);

    let after = engine
        .transition_flow(flow_id, RuleState::Approved, None)
        .unwrap();
    assert_eq!(after.state, RuleState::Denied);
}

#[test]
fn test_deleted_artifacts_leave_listings() {
    let engine = engine();
    engine.ingest_packet(packet(443));
    let id = engine.list_rules()[0].id;
    engine.transition_rule(id, RuleState::Deleted, None).unwrap();
    assert!(engine.list_rules().is_empty());
}
