// src/core/safe_apply.rs

//! Armed-reversion sessions for risky interface changes.
//!
//! `safe_apply_interface` applies a staged change and arms a timer holding
//! the pre-apply config. If the caller can still reach the server it
//! confirms within the window and the reversion is cancelled; otherwise
//! the timer reinstates the prior config. `cancel` reverts immediately.

use crate::core::errors::FlywallError;
use crate::core::manager::ConfigManager;
use crate::core::model::Config;
use crate::core::notifications::{NotificationHub, NotificationKind};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Server-side ceiling on the caller-supplied rollback delay.
pub const MAX_ROLLBACK_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_ROLLBACK_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct ArmedSession {
    prior: Config,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct SafeApplyManager {
    sessions: DashMap<Uuid, ArmedSession>,
}

impl SafeApplyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a reversion to `prior` after `delay`, returning the session id
    /// the caller must confirm against.
    pub fn arm(
        self: &Arc<Self>,
        manager: Arc<ConfigManager>,
        notifications: Arc<NotificationHub>,
        prior: Config,
        delay: Duration,
    ) -> Uuid {
        let delay = delay.min(MAX_ROLLBACK_DELAY);
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.sessions.insert(
            id,
            ArmedSession {
                prior: prior.clone(),
                cancel: cancel.clone(),
            },
        );
        info!(%id, delay_secs = delay.as_secs(), "armed safe-apply reversion");

        let sessions = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if sessions.sessions.remove(&id).is_some() {
                        warn!(%id, "safe-apply window expired, reverting");
                        revert(&manager, &notifications, prior, "window expired").await;
                    }
                }
            }
        });
        id
    }

    /// Cancels the armed reversion; the applied change stands.
    pub fn confirm(&self, id: Uuid) -> Result<(), FlywallError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| FlywallError::NotFound(format!("safe-apply session {id}")))?;
        session.cancel.cancel();
        info!(%id, "safe-apply confirmed");
        Ok(())
    }

    /// Explicitly reverts now instead of waiting for the timer.
    pub async fn cancel(
        &self,
        id: Uuid,
        manager: &Arc<ConfigManager>,
        notifications: &Arc<NotificationHub>,
    ) -> Result<(), FlywallError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| FlywallError::NotFound(format!("safe-apply session {id}")))?;
        session.cancel.cancel();
        revert(manager, notifications, session.prior, "cancelled by caller").await;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.sessions.len()
    }
}

async fn revert(
    manager: &Arc<ConfigManager>,
    notifications: &Arc<NotificationHub>,
    prior: Config,
    reason: &str,
) {
    let result = async {
        manager.stage(move |config| {
            *config = prior;
            Ok(())
        })
        .await?;
        manager.apply().await
    }
    .await;

    match result {
        Ok(_) => {
            notifications.publish(
                NotificationKind::Warning,
                "Configuration Reverted",
                format!("Safe apply was not confirmed ({reason}); the previous configuration was reinstated."),
            );
        }
        Err(e) => {
            warn!("safe-apply reversion failed: {e}");
            notifications.publish(
                NotificationKind::Error,
                "Reversion Failed",
                format!("Safe apply reversion failed: {e}"),
            );
        }
    }
}
