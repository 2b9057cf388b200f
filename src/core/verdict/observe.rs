// src/core/verdict/observe.rs

//! Channel-backed observational packet source for one kernel log group.
//! The kernel binding pushes normalized events in through [`LogGroupSource::inject`];
//! subscribers drain bounded channels on the other side.

use super::{PacketInfo, PacketSource};
use crate::core::errors::FlywallError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Per-subscriber channel capacity. Bounded so a stalled consumer costs
/// drops, never memory.
const SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct LogGroupSource {
    group: u16,
    subscribers: Mutex<Vec<mpsc::Sender<PacketInfo>>>,
    dropped: AtomicU64,
    running: AtomicBool,
}

impl LogGroupSource {
    pub fn new(group: u16) -> Self {
        Self {
            group,
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn group(&self) -> u16 {
        self.group
    }

    /// Entry point for the kernel binding. Fans the event out to every
    /// live subscriber without ever blocking; full or closed channels
    /// count as drops.
    pub fn inject(&self, packet: PacketInfo) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(packet.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl PacketSource for LogGroupSource {
    async fn start(&self) -> Result<(), FlywallError> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!(group = self.group, "log group source already started");
            return Ok(());
        }
        info!(group = self.group, "log group source started");
        Ok(())
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Dropping the senders ends every subscriber stream.
        self.subscribers.lock().clear();
        info!(group = self.group, "log group source stopped");
    }

    fn subscribe(&self) -> mpsc::Receiver<PacketInfo> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
