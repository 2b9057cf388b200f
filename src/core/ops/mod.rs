// src/core/ops/mod.rs

//! The control-plane operation surface: every method a client can invoke,
//! its argument and reply types, and the router that dispatches framed
//! requests to handlers.

mod backup_ops;
mod config_ops;
mod learning_ops;
mod reconcile;
mod router;
mod system_ops;
mod upgrade_ops;

pub use reconcile::{apply_and_reconcile, reconcile_tasks};
pub use router::dispatch;

use crate::core::model::{AlertRuleConfig, InterfaceConfig, InterfaceKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every method the control socket understands. The wire carries the
/// snake_case name; unknown names resolve to a `not_found` error.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Method {
    // Read-only
    Status,
    GetRunning,
    GetStaged,
    GetSection,
    ListInterfaces,
    DhcpLeases,
    DnsStats,
    ListBackups,
    NotificationsSince,
    ReplicationStatus,
    ListPendingRules,
    ListFlows,
    IsInSafeMode,
    SchedulerTasks,
    // Staging
    SetRaw,
    SetSection,
    DeleteSection,
    StageInterface,
    DeleteInterface,
    UpsertAlertRule,
    // Applying
    ApplyConfig,
    DiscardConfig,
    CreateBackup,
    RestoreBackup,
    PinBackup,
    DeleteBackup,
    SafeApplyInterface,
    ConfirmApply,
    CancelApply,
    // Imperative
    RestartService,
    Reboot,
    WakeOnLan,
    Ping,
    StartScanNetwork,
    // Learning
    ApproveRule,
    DenyRule,
    IgnoreRule,
    DeleteRule,
    ApproveFlow,
    DenyFlow,
    DeleteFlow,
    // Upgrade
    StageBinary,
    Upgrade,
    // Safe mode
    EnterSafeMode,
    ExitSafeMode,
    // Logging
    SetLogLevel,
}

// --- Argument types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionRef {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRawArgs {
    pub contents: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSectionArgs {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInterfaceArgs {
    pub name: String,
    pub interface: InterfaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteInterfaceArgs {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAlertRuleArgs {
    pub name: String,
    pub rule: AlertRuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsSinceArgs {
    #[serde(default)]
    pub since_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBackupArgs {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupVersionArgs {
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinBackupArgs {
    pub version: u64,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeApplyInterfaceArgs {
    pub name: String,
    pub interface: InterfaceConfig,
    /// Seconds before the armed reversion fires; defaults from config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplySessionArgs {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartServiceArgs {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeOnLanArgs {
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingArgs {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanNetworkArgs {
    pub subnet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleActionArgs {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBinaryArgs {
    /// Hex-encoded binary image.
    pub data_hex: String,
    /// Expected SHA-256 of the raw bytes, hex.
    pub checksum: String,
    /// Target platform, `os/arch`, e.g. `linux/x86_64`.
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeArgs {
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLogLevelArgs {
    pub level: String,
}

// --- Reply types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub version: String,
    pub uptime_secs: u64,
    pub config_version: u64,
    pub safe_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_mode: Option<String>,
    pub pending_rules: usize,
    pub tracked_flows: usize,
    pub upgrade_state: String,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub load_average_one: f64,
    pub notifications_last_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceSummary {
    pub name: String,
    pub kind: InterfaceKind,
    pub ipv4: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeApplyReply {
    pub id: Uuid,
    pub rollback_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub host: String,
    pub rtt_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acked {
    pub ok: bool,
}

impl Acked {
    pub fn yes() -> Self {
        Self { ok: true }
    }
}
