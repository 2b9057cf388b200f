// src/core/services.rs

//! Capability handles for the external services the control plane
//! orchestrates. The server holds these behind a coarse lock and never
//! reaches into their internals; kernel-facing implementations live in
//! their own crates and are injected at startup. The no-op set backs test
//! runs and `--test-mode` hosts.

use crate::core::errors::FlywallError;
use crate::core::model::Config;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpLease {
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub blocked: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkStatus {
    pub group: String,
    pub interface: String,
    pub up: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub enabled: bool,
    pub peer: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub in_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub ip: String,
    pub mac: String,
    pub hostname: Option<String>,
}

/// Interface addressing, VLANs, and bonds. Runs as the first apply hook,
/// since network changes are the most likely to fail and fail cleanly.
#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn apply(&self, config: &Config) -> Result<(), FlywallError>;
}

/// Loads the ruleset derived from a config into the kernel. Critical
/// apply hook.
#[async_trait]
pub trait FirewallService: Send + Sync {
    async fn reload(&self, config: &Config) -> Result<(), FlywallError>;
    async fn set_policy_enabled(&self, policy: &str, enabled: bool) -> Result<(), FlywallError>;
}

/// Policy-routing tables for uplink groups. Critical apply hook.
#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn apply(&self, config: &Config) -> Result<(), FlywallError>;
}

/// Kernel IP sets backing dynamic rule sets.
#[async_trait]
pub trait IpsetService: Send + Sync {
    async fn sync(&self, config: &Config) -> Result<(), FlywallError>;
    async fn refresh(&self, name: &str) -> Result<(), FlywallError>;
}

#[async_trait]
pub trait DhcpService: Send + Sync {
    async fn reload(&self, config: &Config) -> Result<(), FlywallError>;
    async fn leases(&self) -> Result<Vec<DhcpLease>, FlywallError>;
}

#[async_trait]
pub trait DnsService: Send + Sync {
    async fn reload(&self, config: &Config) -> Result<(), FlywallError>;
    async fn stats(&self) -> Result<DnsStats, FlywallError>;
}

/// Health of uplink group members.
#[async_trait]
pub trait UplinkService: Send + Sync {
    async fn reconcile(&self, config: &Config) -> Result<(), FlywallError>;
    async fn status(&self) -> Result<Vec<UplinkStatus>, FlywallError>;
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn device_id(&self) -> Result<String, FlywallError>;
}

#[async_trait]
pub trait Replicator: Send + Sync {
    async fn status(&self) -> Result<ReplicationStatus, FlywallError>;
}

/// Crash-loop / auto-restart supervision. Disarmed for the duration of an
/// upgrade handoff and rearmed if the handoff fails.
pub trait Watchdog: Send + Sync {
    fn disarm(&self);
    fn rearm(&self);
    fn is_armed(&self) -> bool;
}

/// Host-level imperative operations.
#[async_trait]
pub trait SystemControl: Send + Sync {
    async fn restart_service(&self, name: &str) -> Result<(), FlywallError>;
    async fn reboot(&self) -> Result<(), FlywallError>;
    async fn wake_on_lan(&self, mac: &str) -> Result<(), FlywallError>;
    async fn ping(&self, host: &str, timeout: Duration) -> Result<Duration, FlywallError>;
    async fn scan_network(&self, subnet: &str) -> Result<Vec<ScanResult>, FlywallError>;
}

/// The full set of injected capabilities.
#[derive(Clone)]
pub struct Services {
    pub network: Arc<dyn NetworkService>,
    pub firewall: Arc<dyn FirewallService>,
    pub routing: Arc<dyn RoutingService>,
    pub ipset: Arc<dyn IpsetService>,
    pub dhcp: Arc<dyn DhcpService>,
    pub dns: Arc<dyn DnsService>,
    pub uplinks: Arc<dyn UplinkService>,
    pub identity: Arc<dyn IdentityService>,
    pub replicator: Arc<dyn Replicator>,
    pub watchdog: Arc<dyn Watchdog>,
    pub system: Arc<dyn SystemControl>,
}

impl Services {
    /// The in-memory set used by tests and kernel-less hosts.
    pub fn noop() -> Self {
        let noop = Arc::new(NoopService::default());
        Self {
            network: noop.clone(),
            firewall: noop.clone(),
            routing: noop.clone(),
            ipset: noop.clone(),
            dhcp: noop.clone(),
            dns: noop.clone(),
            uplinks: noop.clone(),
            identity: noop.clone(),
            replicator: noop.clone(),
            watchdog: Arc::new(ArmedFlagWatchdog::default()),
            system: noop,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// A single struct implementing every async capability as a logged no-op.
#[derive(Debug, Default)]
pub struct NoopService {
    reload_count: std::sync::atomic::AtomicU64,
}

impl NoopService {
    pub fn reloads(&self) -> u64 {
        self.reload_count.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl NetworkService for NoopService {
    async fn apply(&self, _config: &Config) -> Result<(), FlywallError> {
        Ok(())
    }
}

#[async_trait]
impl FirewallService for NoopService {
    async fn reload(&self, _config: &Config) -> Result<(), FlywallError> {
        self.reload_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!("noop firewall reload");
        Ok(())
    }
    async fn set_policy_enabled(&self, policy: &str, enabled: bool) -> Result<(), FlywallError> {
        debug!(policy, enabled, "noop policy toggle");
        Ok(())
    }
}

#[async_trait]
impl RoutingService for NoopService {
    async fn apply(&self, _config: &Config) -> Result<(), FlywallError> {
        Ok(())
    }
}

#[async_trait]
impl IpsetService for NoopService {
    async fn sync(&self, _config: &Config) -> Result<(), FlywallError> {
        Ok(())
    }
    async fn refresh(&self, name: &str) -> Result<(), FlywallError> {
        debug!(name, "noop ipset refresh");
        Ok(())
    }
}

#[async_trait]
impl DhcpService for NoopService {
    async fn reload(&self, _config: &Config) -> Result<(), FlywallError> {
        Ok(())
    }
    async fn leases(&self) -> Result<Vec<DhcpLease>, FlywallError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl DnsService for NoopService {
    async fn reload(&self, _config: &Config) -> Result<(), FlywallError> {
        Ok(())
    }
    async fn stats(&self) -> Result<DnsStats, FlywallError> {
        Ok(DnsStats::default())
    }
}

#[async_trait]
impl UplinkService for NoopService {
    async fn reconcile(&self, _config: &Config) -> Result<(), FlywallError> {
        Ok(())
    }
    async fn status(&self) -> Result<Vec<UplinkStatus>, FlywallError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl IdentityService for NoopService {
    async fn device_id(&self) -> Result<String, FlywallError> {
        Ok("flywall-test".to_string())
    }
}

#[async_trait]
impl Replicator for NoopService {
    async fn status(&self) -> Result<ReplicationStatus, FlywallError> {
        Ok(ReplicationStatus::default())
    }
}

#[async_trait]
impl SystemControl for NoopService {
    async fn restart_service(&self, name: &str) -> Result<(), FlywallError> {
        info!(name, "noop service restart");
        Ok(())
    }
    async fn reboot(&self) -> Result<(), FlywallError> {
        info!("noop reboot");
        Ok(())
    }
    async fn wake_on_lan(&self, mac: &str) -> Result<(), FlywallError> {
        info!(mac, "noop wake-on-lan");
        Ok(())
    }
    async fn ping(&self, _host: &str, _timeout: Duration) -> Result<Duration, FlywallError> {
        Ok(Duration::from_millis(1))
    }
    async fn scan_network(&self, _subnet: &str) -> Result<Vec<ScanResult>, FlywallError> {
        Ok(Vec::new())
    }
}

/// Watchdog backed by a flag; the systemd/crash-loop integration flips the
/// same switch from its own process supervisor.
#[derive(Debug)]
pub struct ArmedFlagWatchdog {
    armed: std::sync::atomic::AtomicBool,
}

impl Default for ArmedFlagWatchdog {
    fn default() -> Self {
        Self {
            armed: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

impl Watchdog for ArmedFlagWatchdog {
    fn disarm(&self) {
        info!("watchdog disarmed");
        self.armed.store(false, std::sync::atomic::Ordering::SeqCst);
    }
    fn rearm(&self) {
        info!("watchdog rearmed");
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    fn is_armed(&self) -> bool {
        self.armed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Production host control: magic packets are sent directly, everything
/// else shells out to the init system.
#[derive(Debug, Default)]
pub struct HostSystemControl;

#[async_trait]
impl SystemControl for HostSystemControl {
    async fn restart_service(&self, name: &str) -> Result<(), FlywallError> {
        let status = tokio::process::Command::new("systemctl")
            .args(["restart", name])
            .status()
            .await?;
        if !status.success() {
            return Err(FlywallError::Internal(format!(
                "systemctl restart {name} exited with {status}"
            )));
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<(), FlywallError> {
        info!("reboot requested");
        tokio::process::Command::new("systemctl")
            .arg("reboot")
            .spawn()?;
        Ok(())
    }

    async fn wake_on_lan(&self, mac: &str) -> Result<(), FlywallError> {
        let octets = parse_mac(mac)?;
        let mut frame = vec![0xffu8; 6];
        for _ in 0..16 {
            frame.extend_from_slice(&octets);
        }
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        socket.send_to(&frame, ("255.255.255.255", 9)).await?;
        info!(mac, "sent wake-on-lan magic packet");
        Ok(())
    }

    async fn ping(&self, host: &str, timeout: Duration) -> Result<Duration, FlywallError> {
        let started = std::time::Instant::now();
        let wait = timeout.as_secs().max(1).to_string();
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("ping")
                .args(["-c", "1", "-W", wait.as_str(), host])
                .output(),
        )
        .await
        .map_err(|_| FlywallError::Timeout(format!("ping {host}")))??;
        if !output.status.success() {
            return Err(FlywallError::Unavailable(format!("{host} unreachable")));
        }
        Ok(started.elapsed())
    }

    async fn scan_network(&self, subnet: &str) -> Result<Vec<ScanResult>, FlywallError> {
        // The active scanner lives in the discovery service; hosts without
        // it report unavailable rather than pretending to scan.
        Err(FlywallError::Unavailable(format!(
            "no network scanner available for {subnet}"
        )))
    }
}

fn parse_mac(mac: &str) -> Result<[u8; 6], FlywallError> {
    let parts: Vec<&str> = mac.split([':', '-']).collect();
    if parts.len() != 6 {
        return Err(FlywallError::Validation(format!("invalid MAC '{mac}'")));
    }
    let mut octets = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        octets[i] = u8::from_str_radix(part, 16)
            .map_err(|_| FlywallError::Validation(format!("invalid MAC '{mac}'")))?;
    }
    Ok(octets)
}
