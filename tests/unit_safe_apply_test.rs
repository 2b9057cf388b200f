use flywall::core::manager::ConfigManager;
use flywall::core::model::{Config, InterfaceConfig};
use flywall::core::notifications::{NotificationHub, NotificationKind};
use flywall::core::safe_apply::SafeApplyManager;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    manager: Arc<ConfigManager>,
    notifications: Arc<NotificationHub>,
    safe_apply: Arc<SafeApplyManager>,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(
        ConfigManager::load(&dir.path().join("flywall.conf"), false)
            .await
            .unwrap(),
    );
    // R0: one interface with the original address.
    manager
        .stage(|config| {
            config.interfaces.insert(
                "eth0".to_string(),
                InterfaceConfig {
                    ipv4: vec!["10.0.0.1/24".to_string()],
                    ..InterfaceConfig::default()
                },
            );
            Ok(())
        })
        .await
        .unwrap();
    manager.apply().await.unwrap();

    Fixture {
        manager,
        notifications: Arc::new(NotificationHub::new()),
        safe_apply: Arc::new(SafeApplyManager::new()),
        _dir: dir,
    }
}

async fn apply_risky_change(fixture: &Fixture) -> Config {
    let prior = fixture.manager.get_running().await;
    fixture
        .manager
        .stage(|config| {
            config.interfaces["eth0"].ipv4 = vec!["10.0.0.99/24".to_string()];
            Ok(())
        })
        .await
        .unwrap();
    fixture.manager.apply().await.unwrap();
    prior
}

#[tokio::test]
async fn test_unconfirmed_apply_reverts_after_delay() {
    let fixture = fixture().await;
    let prior = apply_risky_change(&fixture).await;

    fixture.safe_apply.arm(
        fixture.manager.clone(),
        fixture.notifications.clone(),
        prior.clone(),
        Duration::from_secs(2),
    );

    // Still the new address inside the window.
    assert_eq!(
        fixture.manager.get_running().await.interfaces["eth0"].ipv4,
        vec!["10.0.0.99/24"]
    );

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(fixture.manager.get_running().await, prior);
    let batch = fixture.notifications.since(0);
    assert!(
        batch
            .notifications
            .iter()
            .any(|n| n.kind == NotificationKind::Warning
                && n.title.contains("Reverted"))
    );
    assert_eq!(fixture.safe_apply.pending(), 0);
}

#[tokio::test]
async fn test_confirm_cancels_the_reversion() {
    let fixture = fixture().await;
    let prior = apply_risky_change(&fixture).await;

    let id = fixture.safe_apply.arm(
        fixture.manager.clone(),
        fixture.notifications.clone(),
        prior,
        Duration::from_secs(1),
    );
    fixture.safe_apply.confirm(id).unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    // The change stands and no warning was published.
    assert_eq!(
        fixture.manager.get_running().await.interfaces["eth0"].ipv4,
        vec!["10.0.0.99/24"]
    );
    assert!(fixture.notifications.since(0).notifications.is_empty());
}

#[tokio::test]
async fn test_confirm_unknown_session_is_not_found() {
    let fixture = fixture().await;
    let result = fixture.safe_apply.confirm(uuid::Uuid::new_v4());
    assert!(matches!(
        result,
        Err(flywall::core::errors::FlywallError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_reverts_immediately() {
    let fixture = fixture().await;
    let prior = apply_risky_change(&fixture).await;

    let id = fixture.safe_apply.arm(
        fixture.manager.clone(),
        fixture.notifications.clone(),
        prior.clone(),
        Duration::from_secs(60),
    );
    fixture
        .safe_apply
        .cancel(id, &fixture.manager, &fixture.notifications)
        .await
        .unwrap();

    assert_eq!(fixture.manager.get_running().await, prior);
    assert_eq!(fixture.safe_apply.pending(), 0);
}

#[tokio::test]
async fn test_confirm_is_single_shot() {
    let fixture = fixture().await;
    let prior = apply_risky_change(&fixture).await;

    let id = fixture.safe_apply.arm(
        fixture.manager.clone(),
        fixture.notifications.clone(),
        prior,
        Duration::from_secs(30),
    );
    fixture.safe_apply.confirm(id).unwrap();
    assert!(fixture.safe_apply.confirm(id).is_err());
}
