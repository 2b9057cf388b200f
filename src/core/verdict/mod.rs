// src/core/verdict/mod.rs

//! The boundary between the learning system and the kernel packet path.
//!
//! Two bus shapes share the same lifecycle contract: an observational
//! source streaming packet events (async mode) and an inline queue that
//! demands a verdict per packet (inline mode). Kernel bindings sit on the
//! far side of these traits; the core never talks to the kernel directly.

mod inline;
mod observe;

pub use inline::InlineQueue;
pub use observe::LogGroupSource;

use crate::core::errors::FlywallError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the bus tells the kernel to do with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusVerdict {
    Accept,
    Drop,
    /// Accept and stamp a 32-bit mark so the kernel fast-paths the flow.
    AcceptWithMark(u32),
}

/// What the learning engine decides about a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineVerdict {
    Allow,
    Drop,
    Offload,
    Inspect,
}

/// Normalized packet metadata, shared by both modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub src_mac: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: String,
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_tag: Option<String>,
}

/// Maps an engine decision (or failure) to exactly one bus verdict.
/// Engine errors fail open: the packet is accepted unmarked so a buggy
/// engine can never black-hole traffic.
pub fn map_verdict(
    decision: Result<EngineVerdict, FlywallError>,
    offload_mark: u32,
) -> BusVerdict {
    match decision {
        Ok(EngineVerdict::Allow) => BusVerdict::Accept,
        Ok(EngineVerdict::Drop) => BusVerdict::Drop,
        Ok(EngineVerdict::Offload) => BusVerdict::AcceptWithMark(offload_mark),
        Ok(EngineVerdict::Inspect) => BusVerdict::Accept,
        Err(_) => BusVerdict::Accept,
    }
}

/// Verdict callback installed on an inline queue.
pub type VerdictFn = Arc<dyn Fn(PacketInfo) -> BusVerdict + Send + Sync>;

/// An observational packet stream. `start`/`stop` are idempotent; delivery
/// is best-effort with a drop counter, never backpressure on the producer.
#[async_trait::async_trait]
pub trait PacketSource: Send + Sync {
    async fn start(&self) -> Result<(), FlywallError>;
    async fn stop(&self);
    /// Registers a new bounded subscription. A stalled consumer causes
    /// drops on its own channel, not a stall of the source.
    fn subscribe(&self) -> mpsc::Receiver<PacketInfo>;
    fn dropped(&self) -> u64;
}

/// An inline verdict queue. `start` binds the kernel queue and may be
/// refused, in which case the pipeline downgrades to async mode.
#[async_trait::async_trait]
pub trait VerdictQueue: Send + Sync {
    async fn start(&self) -> Result<(), FlywallError>;
    async fn stop(&self);
    fn set_verdict_fn(&self, f: VerdictFn);
}
