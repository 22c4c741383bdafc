use serde::Deserialize;

/// Backlog sizes past which a subscriber is considered too slow for interframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscardThresholds {
    pub max_bytes: usize,
    pub max_packets: usize,
}

impl Default for DiscardThresholds {
    fn default() -> Self {
        DiscardThresholds {
            max_bytes: 2 * 1024 * 1024,
            max_packets: 200,
        }
    }
}

/// What is currently waiting in a subscriber's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outstanding {
    pub bytes: usize,
    pub packets: usize,
}

/// Decides which skippable packets reach a subscriber.
///
/// Dropping starts only once *both* the byte and packet backlog are over their thresholds, and
/// stops as soon as *either* one falls back to its threshold or below.  Non-skippable packets are
/// always admitted, even when that grows the backlog without bound.
#[derive(Debug)]
pub struct DiscardPolicy {
    thresholds: DiscardThresholds,
    skipping: bool,
}

impl DiscardPolicy {
    pub fn new(thresholds: DiscardThresholds) -> DiscardPolicy {
        DiscardPolicy {
            thresholds,
            skipping: false,
        }
    }

    pub fn is_skipping(&self) -> bool {
        self.skipping
    }

    /// Returns true when the packet should be queued
    pub fn admit(&mut self, skippable: bool, outstanding: Outstanding) -> bool {
        if !skippable {
            return true;
        }

        let bytes_over = outstanding.bytes > self.thresholds.max_bytes;
        let packets_over = outstanding.packets > self.thresholds.max_packets;

        if self.skipping {
            if !bytes_over || !packets_over {
                self.skipping = false;
                return true;
            }

            return false;
        }

        if bytes_over && packets_over {
            self.skipping = true;
            return false;
        }

        true
    }
}
