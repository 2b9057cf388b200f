// src/core/model/mod.rs

//! The typed configuration tree. Every block of the on-disk config file has
//! a struct here; collections are `IndexMap` so render order is stable
//! across round trips.

use crate::core::errors::FlywallError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SCHEMA_VERSION: u32 = 2;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}
fn default_true() -> bool {
    true
}
fn default_max_backups() -> usize {
    10
}
fn default_offload_mark() -> u32 {
    0x0001_0000
}
fn default_queue_num() -> u16 {
    0
}
fn default_learning_log_group() -> u16 {
    100
}
fn default_pending_limit() -> usize {
    5000
}
fn default_lease_time() -> Duration {
    Duration::from_secs(86400)
}
fn default_check_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_rollback_delay() -> Duration {
    Duration::from_secs(30)
}

/// The whole configuration tree. Deep-clonable; the config manager never
/// hands out anything but clones of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceConfig>,
    #[serde(default)]
    pub zones: IndexMap<String, ZoneConfig>,
    #[serde(default)]
    pub policies: IndexMap<String, PolicyConfig>,
    #[serde(default)]
    pub dhcp: IndexMap<String, DhcpScopeConfig>,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub uplink_groups: IndexMap<String, UplinkGroupConfig>,
    #[serde(default)]
    pub schedules: IndexMap<String, ScheduledRuleConfig>,
    #[serde(default)]
    pub ipsets: IndexMap<String, IpSetConfig>,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub alerts: IndexMap<String, AlertRuleConfig>,
    #[serde(default)]
    pub backups: BackupPolicyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            system: SystemConfig::default(),
            interfaces: IndexMap::new(),
            zones: IndexMap::new(),
            policies: IndexMap::new(),
            dhcp: IndexMap::new(),
            dns: DnsConfig::default(),
            uplink_groups: IndexMap::new(),
            schedules: IndexMap::new(),
            ipsets: IndexMap::new(),
            learning: LearningConfig::default(),
            api: ApiConfig::default(),
            alerts: IndexMap::new(),
            backups: BackupPolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub timezone: String,
}

/// Kind of a configured interface. VLANs and bonds are staged and deleted
/// through the same operations as physical interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    #[default]
    Physical,
    Vlan,
    Bond,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default)]
    pub kind: InterfaceKind,
    /// CIDR addresses, e.g. `10.0.0.1/24`.
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
    #[serde(default)]
    pub dhcp_client: bool,
    #[serde(default)]
    pub zone: Option<String>,
    /// VLAN id; only meaningful for `kind = vlan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    /// Parent device for VLANs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Member devices for bonds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            kind: InterfaceKind::Physical,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            dhcp_client: false,
            zone: None,
            vlan_id: None,
            parent: None,
            members: Vec::new(),
            mtu: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ZoneConfig {
    #[serde(default)]
    pub description: String,
    /// Default policy for traffic terminating in this zone.
    #[serde(default)]
    pub default_action: PolicyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Accept,
    #[default]
    Drop,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub from_zone: String,
    pub to_zone: String,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dst_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    /// Name of an ipset this policy matches against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipset: Option<String>,
    #[serde(default)]
    pub log: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpScopeConfig {
    pub interface: String,
    pub range_start: String,
    pub range_end: String,
    #[serde(default = "default_lease_time", with = "humantime_serde")]
    pub lease_time: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DnsConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub listen: Vec<String>,
    #[serde(default)]
    pub query_logging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UplinkMode {
    #[default]
    Failover,
    Balance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkMember {
    pub interface: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkGroupConfig {
    #[serde(default)]
    pub mode: UplinkMode,
    pub members: Vec<UplinkMember>,
    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    #[default]
    Enable,
    Disable,
}

/// A time-driven toggle of a named policy. The scheduler derives task ids
/// `rule_<name>` from these entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRuleConfig {
    pub policy: String,
    /// `every <duration>`, `daily <HH:MM>`, or a cron expression.
    pub schedule: String,
    #[serde(default)]
    pub action: ScheduleAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpSetConfig {
    #[serde(default)]
    pub set_type: String,
    #[serde(default)]
    pub entries: Vec<String>,
    /// Optional refresh schedule; present entries yield `ipset_<name>` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    #[default]
    Async,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: LearningMode,
    /// 32-bit mark stamped on offloaded flows so the kernel fast-paths them.
    #[serde(default = "default_offload_mark")]
    pub offload_mark: u32,
    /// Kernel queue number for inline mode.
    #[serde(default = "default_queue_num")]
    pub queue_num: u16,
    /// Log group carrying learning observations (group 0 is always read).
    #[serde(default = "default_learning_log_group")]
    pub log_group: u16,
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: LearningMode::Async,
            offload_mark: default_offload_mark(),
            queue_num: default_queue_num(),
            log_group: default_learning_log_group(),
            pending_limit: default_pending_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Group granted access to the control socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_group: Option<String>,
    #[serde(default = "default_rollback_delay", with = "humantime_serde")]
    pub safe_apply_rollback_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            socket_group: None,
            safe_apply_rollback_delay: default_rollback_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    /// Event name this rule fires on, e.g. `uplink_down`.
    pub event: String,
    #[serde(default)]
    pub kind: crate::core::notifications::NotificationKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPolicyConfig {
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Schedule for automatic backups; yields the `system_backup` task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_schedule: Option<String>,
}

impl Default for BackupPolicyConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
            auto_schedule: None,
        }
    }
}

impl Config {
    /// Validates referential integrity across the tree. Called before any
    /// staged mutation is accepted.
    pub fn validate(&self) -> Result<(), FlywallError> {
        for (name, iface) in &self.interfaces {
            if name.trim().is_empty() {
                return Err(FlywallError::Validation(
                    "interface name cannot be empty".into(),
                ));
            }
            match iface.kind {
                InterfaceKind::Vlan => {
                    let parent = iface.parent.as_deref().ok_or_else(|| {
                        FlywallError::Validation(format!("vlan '{name}' has no parent"))
                    })?;
                    if !self.interfaces.contains_key(parent) {
                        return Err(FlywallError::Validation(format!(
                            "vlan '{name}' references unknown parent '{parent}'"
                        )));
                    }
                    if iface.vlan_id.is_none() {
                        return Err(FlywallError::Validation(format!(
                            "vlan '{name}' has no vlan_id"
                        )));
                    }
                }
                InterfaceKind::Bond => {
                    if iface.members.is_empty() {
                        return Err(FlywallError::Validation(format!(
                            "bond '{name}' has no members"
                        )));
                    }
                }
                InterfaceKind::Physical => {}
            }
            if let Some(zone) = &iface.zone
                && !self.zones.contains_key(zone)
            {
                return Err(FlywallError::Validation(format!(
                    "interface '{name}' references unknown zone '{zone}'"
                )));
            }
        }

        for (name, policy) in &self.policies {
            for zone in [&policy.from_zone, &policy.to_zone] {
                if zone != "any" && !self.zones.contains_key(zone) {
                    return Err(FlywallError::Validation(format!(
                        "policy '{name}' references unknown zone '{zone}'"
                    )));
                }
            }
            if let Some(set) = &policy.ipset
                && !self.ipsets.contains_key(set)
            {
                return Err(FlywallError::Validation(format!(
                    "policy '{name}' references unknown ipset '{set}'"
                )));
            }
        }

        for (name, scope) in &self.dhcp {
            if !self.interfaces.contains_key(&scope.interface) {
                return Err(FlywallError::Validation(format!(
                    "dhcp scope '{name}' references unknown interface '{}'",
                    scope.interface
                )));
            }
        }

        for (name, rule) in &self.schedules {
            if !self.policies.contains_key(&rule.policy) {
                return Err(FlywallError::Validation(format!(
                    "schedule '{name}' references unknown policy '{}'",
                    rule.policy
                )));
            }
        }

        for (name, group) in &self.uplink_groups {
            if group.members.is_empty() {
                return Err(FlywallError::Validation(format!(
                    "uplink group '{name}' has no members"
                )));
            }
            for member in &group.members {
                if !self.interfaces.contains_key(&member.interface) {
                    return Err(FlywallError::Validation(format!(
                        "uplink group '{name}' references unknown interface '{}'",
                        member.interface
                    )));
                }
            }
        }

        if self.backups.max_backups == 0 {
            return Err(FlywallError::Validation(
                "backups.max_backups cannot be 0".into(),
            ));
        }
        Ok(())
    }
}
