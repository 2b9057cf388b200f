use flywall::config::Settings;
use flywall::core::errors::ErrorKind;
use flywall::core::notifications::NotificationKind;
use flywall::core::protocol::RequestEnvelope;
use flywall::core::services::Services;
use flywall::core::state::ServerState;
use flywall::core::{ops, upgrade};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

async fn state_in(dir: &TempDir) -> Arc<ServerState> {
    let settings = Settings::rooted_at(dir.path());
    ServerState::initialize(settings, Services::noop(), None)
        .await
        .unwrap()
}

async fn call(state: &Arc<ServerState>, method: &str, args: Value) -> Result<Value, ErrorKind> {
    let response = ops::dispatch(
        state.clone(),
        RequestEnvelope {
            id: 1,
            method: method.to_string(),
            args,
        },
    )
    .await;
    match response.error {
        Some(error) => Err(error.kind),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

fn iface_args(name: &str, addr: &str) -> Value {
    json!({
        "name": name,
        "interface": { "ipv4": [addr] }
    })
}

#[tokio::test]
async fn test_unknown_method_is_not_found() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;
    let err = call(&state, "frobnicate", Value::Null).await.unwrap_err();
    assert_eq!(err, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_bad_arguments_are_validation_errors() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;
    let err = call(&state, "stage_interface", json!({ "bogus": true }))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::Validation);
}

#[tokio::test]
async fn test_status_reports_core_fields() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;
    let status = call(&state, "status", Value::Null).await.unwrap();
    assert_eq!(status["config_version"], 1);
    assert_eq!(status["safe_mode"], false);
    assert_eq!(status["upgrade_state"], "idle");
}

#[tokio::test]
async fn test_stage_and_apply_round_trip() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    // R0: eth0 at 10.0.0.1/24.
    call(&state, "stage_interface", iface_args("eth0", "10.0.0.1/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();

    // Update the address and apply.
    call(&state, "stage_interface", iface_args("eth0", "10.0.0.2/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();

    let running = call(&state, "get_running", Value::Null).await.unwrap();
    assert_eq!(
        running["interfaces"]["eth0"]["ipv4"],
        json!(["10.0.0.2/24"])
    );

    let batch = state.notifications.since(0);
    assert!(
        batch
            .notifications
            .iter()
            .any(|n| n.kind == NotificationKind::Success
                && n.title.contains("Configuration Applied"))
    );

    let persisted =
        std::fs::read_to_string(state.settings.config_path()).unwrap();
    assert!(persisted.contains("10.0.0.2/24"));
}

#[tokio::test]
async fn test_discard_resets_staged_to_running() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    call(&state, "stage_interface", iface_args("eth0", "10.0.0.1/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();
    let r0 = call(&state, "get_running", Value::Null).await.unwrap();

    call(&state, "stage_interface", iface_args("eth0", "172.16.0.1/24"))
        .await
        .unwrap();
    assert_ne!(
        call(&state, "get_staged", Value::Null).await.unwrap(),
        r0
    );

    call(&state, "discard_config", Value::Null).await.unwrap();
    assert_eq!(call(&state, "get_staged", Value::Null).await.unwrap(), r0);
    assert_eq!(call(&state, "get_running", Value::Null).await.unwrap(), r0);
}

#[tokio::test]
async fn test_backup_create_and_restore() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    call(&state, "stage_interface", iface_args("eth0", "10.0.0.1/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();
    let r0 = call(&state, "get_running", Value::Null).await.unwrap();

    let backup = call(
        &state,
        "create_backup",
        json!({ "description": "before-test" }),
    )
    .await
    .unwrap();
    let version = backup["version"].as_u64().unwrap();

    // Modify and apply.
    call(&state, "stage_interface", iface_args("eth0", "192.168.50.1/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();
    assert_ne!(call(&state, "get_running", Value::Null).await.unwrap(), r0);

    call(&state, "restore_backup", json!({ "version": version }))
        .await
        .unwrap();
    assert_eq!(call(&state, "get_running", Value::Null).await.unwrap(), r0);

    let batch = state.notifications.since(0);
    assert!(
        batch
            .notifications
            .iter()
            .any(|n| n.title.contains("Backup Restored"))
    );
}

#[tokio::test]
async fn test_list_backups_is_ordered_by_version() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    for i in 0..3 {
        call(&state, "create_backup", json!({ "description": format!("b{i}") }))
            .await
            .unwrap();
    }
    let listed = call(&state, "list_backups", Value::Null).await.unwrap();
    let versions: Vec<u64> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["version"].as_u64().unwrap())
        .collect();
    let mut sorted = versions.clone();
    sorted.sort_unstable();
    assert_eq!(versions, sorted);
}

#[tokio::test]
async fn test_safe_apply_reverts_without_confirmation() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    call(&state, "stage_interface", iface_args("eth0", "10.0.0.1/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();
    let r0 = call(&state, "get_running", Value::Null).await.unwrap();

    let reply = call(
        &state,
        "safe_apply_interface",
        json!({
            "name": "eth0",
            "interface": { "ipv4": ["10.0.0.77/24"] },
            "rollback_delay_secs": 2
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply["rollback_delay_secs"], 2);

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    assert_eq!(call(&state, "get_running", Value::Null).await.unwrap(), r0);
    let batch = state.notifications.since(0);
    assert!(
        batch
            .notifications
            .iter()
            .any(|n| n.kind == NotificationKind::Warning)
    );
}

#[tokio::test]
async fn test_safe_apply_confirm_keeps_change() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    call(&state, "stage_interface", iface_args("eth0", "10.0.0.1/24"))
        .await
        .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();

    let reply = call(
        &state,
        "safe_apply_interface",
        json!({
            "name": "eth0",
            "interface": { "ipv4": ["10.0.0.77/24"] },
            "rollback_delay_secs": 2
        }),
    )
    .await
    .unwrap();
    call(&state, "confirm_apply", json!({ "id": reply["id"] }))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    let running = call(&state, "get_running", Value::Null).await.unwrap();
    assert_eq!(
        running["interfaces"]["eth0"]["ipv4"],
        json!(["10.0.0.77/24"])
    );
}

#[tokio::test]
async fn test_safe_mode_round_trip() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    assert_eq!(
        call(&state, "is_in_safe_mode", Value::Null).await.unwrap(),
        json!(false)
    );
    call(&state, "enter_safe_mode", Value::Null).await.unwrap();
    assert_eq!(
        call(&state, "is_in_safe_mode", Value::Null).await.unwrap(),
        json!(true)
    );
    call(&state, "exit_safe_mode", Value::Null).await.unwrap();
    assert_eq!(
        call(&state, "is_in_safe_mode", Value::Null).await.unwrap(),
        json!(false)
    );
}

#[tokio::test]
async fn test_stage_binary_rejects_wrong_arch_over_rpc() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;
    let data = b"image bytes";

    let response = ops::dispatch(
        state.clone(),
        RequestEnvelope {
            id: 9,
            method: "stage_binary".to_string(),
            args: json!({
                "data_hex": hex::encode(data),
                "checksum": upgrade::sha256_hex(data),
                "arch": "linux/unknown"
            }),
        },
    )
    .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(error.message.contains("architecture mismatch"));
    assert!(!state.settings.staged_binary_path().exists());
}

#[tokio::test]
async fn test_scheduler_tasks_follow_config() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    // A policy plus a scheduled toggle for it.
    call(
        &state,
        "set_section",
        json!({ "kind": "zone", "label": "lan", "body": "description = \"inside\"\n" }),
    )
    .await
    .unwrap();
    call(
        &state,
        "set_section",
        json!({
            "kind": "policy",
            "label": "web",
            "body": "from_zone = \"lan\"\nto_zone = \"any\"\naction = \"accept\"\n"
        }),
    )
    .await
    .unwrap();
    call(
        &state,
        "set_section",
        json!({
            "kind": "schedule",
            "label": "night",
            "body": "policy = \"web\"\nschedule = \"daily 22:00\"\naction = \"disable\"\n"
        }),
    )
    .await
    .unwrap();
    call(&state, "apply_config", Value::Null).await.unwrap();

    let tasks = call(&state, "scheduler_tasks", Value::Null).await.unwrap();
    let ids: Vec<&str> = tasks
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"rule_night"));

    // Re-applying the same config yields the same task set.
    call(&state, "apply_config", Value::Null).await.unwrap();
    let tasks_again = call(&state, "scheduler_tasks", Value::Null).await.unwrap();
    let ids_again: Vec<&str> = tasks_again
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ids_again);
}

#[tokio::test]
async fn test_learning_decisions_over_rpc() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    state.engine.ingest_packet(flywall::core::verdict::PacketInfo {
        src_mac: "aa:bb:cc:dd:ee:ff".to_string(),
        src_ip: "10.0.0.5".parse().unwrap(),
        dst_ip: "1.2.3.4".parse().unwrap(),
        dst_port: 443,
        protocol: "tcp".to_string(),
        interface: "eth0".to_string(),
        policy_tag: None,
    });

    let rules = call(&state, "list_pending_rules", Value::Null).await.unwrap();
    let id = rules[0]["id"].as_u64().unwrap();

    let approved = call(
        &state,
        "approve_rule",
        json!({ "id": id, "user": "alice" }),
    )
    .await
    .unwrap();
    assert_eq!(approved["state"], "approved");
    assert_eq!(approved["acted_by"], "alice");

    // Idempotent over RPC too.
    let again = call(&state, "approve_rule", json!({ "id": id })).await.unwrap();
    assert_eq!(again["state"], "approved");

    let missing = call(&state, "approve_rule", json!({ "id": 99999 }))
        .await
        .unwrap_err();
    assert_eq!(missing, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_get_section_round_trips_through_set_section() {
    let dir = TempDir::new().unwrap();
    let state = state_in(&dir).await;

    call(&state, "stage_interface", iface_args("eth0", "10.0.0.1/24"))
        .await
        .unwrap();
    let body = call(
        &state,
        "get_section",
        json!({ "kind": "interface", "label": "eth0" }),
    )
    .await
    .unwrap();

    // Writing a section's own text back is a no-op.
    let staged_before = call(&state, "get_staged", Value::Null).await.unwrap();
    call(
        &state,
        "set_section",
        json!({ "kind": "interface", "label": "eth0", "body": body }),
    )
    .await
    .unwrap();
    assert_eq!(
        call(&state, "get_staged", Value::Null).await.unwrap(),
        staged_before
    );
}
