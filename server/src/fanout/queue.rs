use super::policy::{DiscardPolicy, DiscardThresholds, Outstanding};
use crate::media::MediaPacket;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Running totals of what sits between a subscriber's producers and its drain worker
#[derive(Debug, Default)]
pub struct QueueCounters {
    bytes: AtomicUsize,
    packets: AtomicUsize,
    dropped: AtomicU64,
}

impl QueueCounters {
    pub fn outstanding(&self) -> Outstanding {
        Outstanding {
            bytes: self.bytes.load(Ordering::Acquire),
            packets: self.packets.load(Ordering::Acquire),
        }
    }

    /// Packets the discard policy refused
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn added(&self, bytes: usize) {
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
        self.packets.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn removed(&self, bytes: usize) {
        self.bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.packets.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Producer side of a subscriber's queue.  Any number of publishers' ingest paths may enqueue
/// into it concurrently; a single [`super::FanoutWorker`] drains it.
#[derive(Debug)]
pub struct FanoutQueue {
    sender: mpsc::UnboundedSender<MediaPacket>,
    counters: Arc<QueueCounters>,
    policy: Mutex<DiscardPolicy>,
}

/// Consumer side handed to the drain worker
pub struct FanoutReceiver {
    pub(super) receiver: mpsc::UnboundedReceiver<MediaPacket>,
    pub(super) counters: Arc<QueueCounters>,
}

/// Creates the two halves of a subscriber queue
pub fn channel(thresholds: DiscardThresholds) -> (FanoutQueue, FanoutReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let counters = Arc::new(QueueCounters::default());

    let queue = FanoutQueue {
        sender,
        counters: counters.clone(),
        policy: Mutex::new(DiscardPolicy::new(thresholds)),
    };

    (queue, FanoutReceiver { receiver, counters })
}

#[cfg(test)]
impl FanoutReceiver {
    /// Takes the next queued packet without waiting for one
    pub fn try_recv(&mut self) -> Option<MediaPacket> {
        let packet = self.receiver.try_recv().ok()?;
        self.counters.removed(packet.len());
        Some(packet)
    }
}

impl FanoutQueue {
    /// Queues the packet unless the discard policy rejects it.  Takes one claim on the payload
    /// when queued; a rejected packet releases its claim immediately.
    pub fn enqueue(&self, packet: MediaPacket) -> bool {
        let mut policy = self.policy.lock();
        if !policy.admit(packet.is_skippable(), self.counters.outstanding()) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(bytes = packet.len(), "Dropping skippable packet for slow subscriber");
            return false;
        }

        let length = packet.len();
        self.counters.added(length);
        if self.sender.send(packet).is_err() {
            // Worker is gone, the packet came back in the error and was dropped with it
            self.counters.removed(length);
            return false;
        }

        true
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
