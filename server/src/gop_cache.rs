//! Group of pictures cache used to let new subscribers start decoding immediately.

use crate::media::{MediaKind, MediaPacket};

/// Holds every audio and video tag since the most recent video key frame.
///
/// Entries are clones of the live packets, so each cached tag holds one claim on its pooled
/// buffer until the cache is cleared or dropped.  Sequence headers and metadata are never cached
/// here; they outlive any single GOP and are kept next to it by the publisher.
#[derive(Debug)]
pub struct GopCache {
    packets: Vec<MediaPacket>,
    max_tags: usize,
    enabled: bool,
    has_key_frame: bool,
}

impl GopCache {
    pub fn new(max_tags: usize) -> GopCache {
        GopCache {
            packets: Vec::new(),
            max_tags,
            enabled: true,
            has_key_frame: false,
        }
    }

    /// A cache that never holds anything
    pub fn disabled() -> GopCache {
        GopCache {
            enabled: false,
            ..GopCache::new(0)
        }
    }

    pub fn push(&mut self, packet: &MediaPacket) {
        if !self.enabled || packet.is_sequence_header || packet.kind == MediaKind::Metadata {
            return;
        }

        if packet.is_key_frame {
            self.packets.clear();
            self.has_key_frame = true;
        } else if !self.has_key_frame {
            // Tags before the first key frame can't be decoded by a joining player
            return;
        }

        if self.packets.len() >= self.max_tags {
            tracing::debug!(
                max_tags = self.max_tags,
                "GOP longer than the cache allows, caching resumes at the next key frame"
            );

            self.clear();
            return;
        }

        self.packets.push(packet.clone());
    }

    /// Releases every cached tag
    pub fn clear(&mut self) {
        self.packets.clear();
        self.has_key_frame = false;
    }

    pub fn packets(&self) -> &[MediaPacket] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
