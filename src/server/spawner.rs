// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use crate::core::notifications::NotificationKind;
use crate::core::ops;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often uplink group health is polled.
const UPLINK_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// How long the process must stay up before the crash-loop marker clears.
const HEALTHY_AFTER: Duration = Duration::from_secs(60);

/// Spawns all critical background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;

    // --- Scheduler ---
    let scheduler = state.scheduler.clone();
    let shutdown_rx_sched = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        scheduler.run(shutdown_rx_sched).await;
    });

    // Seed the managed task set from the running config.
    let running = state.manager.get_running().await;
    ops::reconcile_tasks(state, &running).await;

    // --- Learning pipeline ---
    if let Err(e) = state.pipeline.start(shutdown_tx).await {
        warn!("learning pipeline failed to start: {e}");
    }

    // --- Uplink health watcher ---
    let uplink_state = state.clone();
    let mut shutdown_rx_uplink = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        let mut interval = tokio::time::interval(UPLINK_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_up: HashMap<String, bool> = HashMap::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let services = uplink_state.services().await;
                    let statuses = match services.uplinks.status().await {
                        Ok(statuses) => statuses,
                        Err(e) => {
                            debug!("uplink status poll failed: {e}");
                            continue;
                        }
                    };
                    for status in statuses {
                        let key = format!("{}/{}", status.group, status.interface);
                        let previous = last_up.insert(key.clone(), status.up);
                        match previous {
                            Some(was_up) if was_up != status.up => {
                                if status.up {
                                    uplink_state.notifications.publish(
                                        NotificationKind::Success,
                                        "Uplink Restored",
                                        format!("{key} is back up."),
                                    );
                                } else {
                                    uplink_state.notifications.publish(
                                        NotificationKind::Error,
                                        "Uplink Down",
                                        format!("{key} lost connectivity."),
                                    );
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ = shutdown_rx_uplink.recv() => return,
            }
        }
    });

    // --- Crash-loop marker clearer ---
    if !state.settings.test_mode {
        let marker = state.settings.boot_marker_path();
        let mut shutdown_rx_marker = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(HEALTHY_AFTER) => {
                    match tokio::fs::remove_file(&marker).await {
                        Ok(()) => debug!("cleared crash-loop boot marker"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!("failed to clear boot marker: {e}"),
                    }
                }
                _ = shutdown_rx_marker.recv() => {}
            }
        });
    }

    info!("all background tasks have been spawned");
    Ok(())
}
