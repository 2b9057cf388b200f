use flywall::core::errors::FlywallError;
use flywall::core::upgrade::{UpgradeManager, UpgradeState, host_arch, sha256_hex};
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

fn manager_in(dir: &TempDir) -> UpgradeManager {
    UpgradeManager::new(
        dir.path().join("flywall_new"),
        dir.path().join("handoff.json"),
    )
}

#[tokio::test]
async fn test_stage_binary_verifies_and_writes_executable() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let data = b"#!/bin/sh\nexit 0\n";

    manager
        .stage_binary(data, &sha256_hex(data), &host_arch())
        .await
        .unwrap();

    assert_eq!(manager.state().await, UpgradeState::Staged);
    let written = std::fs::read(dir.path().join("flywall_new")).unwrap();
    assert_eq!(written, data);
    let mode = std::fs::metadata(dir.path().join("flywall_new"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn test_stage_binary_rejects_wrong_arch_without_writing() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let data = b"binary image";

    let result = manager
        .stage_binary(data, &sha256_hex(data), "linux/unknown")
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("architecture mismatch"));
    assert!(!dir.path().join("flywall_new").exists());
    assert_eq!(manager.state().await, UpgradeState::Idle);
}

#[tokio::test]
async fn test_stage_binary_rejects_checksum_mismatch() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let result = manager
        .stage_binary(b"binary image", &sha256_hex(b"other bytes"), &host_arch())
        .await;

    assert!(matches!(result, Err(FlywallError::ChecksumMismatch)));
    assert!(!dir.path().join("flywall_new").exists());
}

#[tokio::test]
async fn test_upgrade_without_staged_binary_is_invalid_state() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let watchdog: std::sync::Arc<dyn flywall::core::services::Watchdog> =
        std::sync::Arc::new(flywall::core::services::ArmedFlagWatchdog::default());

    let result = manager
        .upgrade(
            &sha256_hex(b"whatever"),
            flywall::core::upgrade::HandoffState {
                config_text: String::new(),
                socket_path: dir.path().join("control.sock"),
                config_version: 1,
                old_pid: std::process::id(),
                version: "test".to_string(),
            },
            3,
            watchdog,
        )
        .await;

    assert!(matches!(result, Err(FlywallError::InvalidState(_))));
}

#[tokio::test]
async fn test_upgrade_detects_on_disk_tampering() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let data = b"original image";
    manager
        .stage_binary(data, &sha256_hex(data), &host_arch())
        .await
        .unwrap();

    // Tamper with the staged file behind the manager's back.
    std::fs::write(dir.path().join("flywall_new"), b"tampered").unwrap();

    let watchdog: std::sync::Arc<dyn flywall::core::services::Watchdog> =
        std::sync::Arc::new(flywall::core::services::ArmedFlagWatchdog::default());
    let result = manager
        .upgrade(
            &sha256_hex(data),
            flywall::core::upgrade::HandoffState {
                config_text: String::new(),
                socket_path: dir.path().join("control.sock"),
                config_version: 1,
                old_pid: std::process::id(),
                version: "test".to_string(),
            },
            3,
            watchdog.clone(),
        )
        .await;

    assert!(matches!(result, Err(FlywallError::ChecksumMismatch)));
    // Verification failure leaves the watchdog armed.
    assert!(watchdog.is_armed());
}

#[tokio::test]
async fn test_restaging_replaces_previous_binary() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let first = b"first image";
    manager
        .stage_binary(first, &sha256_hex(first), &host_arch())
        .await
        .unwrap();
    let second = b"second image";
    manager
        .stage_binary(second, &sha256_hex(second), &host_arch())
        .await
        .unwrap();

    let written = std::fs::read(dir.path().join("flywall_new")).unwrap();
    assert_eq!(written, second);
}

#[test]
fn test_host_arch_is_linux_slash_arch() {
    let arch = host_arch();
    assert!(arch.starts_with("linux/"));
}

#[test]
fn test_sha256_hex_is_stable() {
    assert_eq!(
        sha256_hex(b"flywall"),
        sha256_hex(b"flywall"),
    );
    assert_ne!(sha256_hex(b"flywall"), sha256_hex(b"flywal"));
    assert_eq!(sha256_hex(b"").len(), 64);
}
