// src/core/verdict/inline.rs

//! Channel-backed inline verdict queue. The kernel binding submits each
//! held packet through [`InlineQueue::submit`] and gets exactly one verdict
//! back; the verdict function must stay within the kernel's queue timeout,
//! so it performs no disk or network I/O.

use super::{BusVerdict, PacketInfo, VerdictFn, VerdictQueue};
use crate::core::errors::FlywallError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Default)]
pub struct InlineQueue {
    queue_num: u16,
    verdict_fn: RwLock<Option<VerdictFn>>,
    running: AtomicBool,
    /// Set when the kernel refuses the queue bind; used by bindings that
    /// probe capability up front, and by tests.
    refuse_bind: AtomicBool,
    processed: AtomicU64,
}

impl InlineQueue {
    pub fn new(queue_num: u16) -> Self {
        Self {
            queue_num,
            ..Self::default()
        }
    }

    /// A queue whose bind always fails, forcing the async fallback path.
    pub fn refusing(queue_num: u16) -> Self {
        let queue = Self::new(queue_num);
        queue.refuse_bind.store(true, Ordering::Release);
        queue
    }

    pub fn queue_num(&self) -> u16 {
        self.queue_num
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Resolves one held packet. Emits exactly one verdict; a missing
    /// verdict function fails open.
    pub fn submit(&self, packet: PacketInfo) -> BusVerdict {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let verdict_fn = self.verdict_fn.read().clone();
        match verdict_fn {
            Some(f) => f(packet),
            None => {
                warn!("inline queue has no verdict function installed, failing open");
                BusVerdict::Accept
            }
        }
    }
}

impl std::fmt::Debug for InlineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineQueue")
            .field("queue_num", &self.queue_num)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl VerdictQueue for InlineQueue {
    async fn start(&self) -> Result<(), FlywallError> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.refuse_bind.load(Ordering::Acquire) {
            return Err(FlywallError::Unavailable(format!(
                "kernel refused verdict queue {}",
                self.queue_num
            )));
        }
        self.running.store(true, Ordering::Release);
        info!(queue = self.queue_num, "inline verdict queue bound");
        Ok(())
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(queue = self.queue_num, "inline verdict queue released");
    }

    fn set_verdict_fn(&self, f: VerdictFn) {
        *self.verdict_fn.write() = Some(f);
    }
}
