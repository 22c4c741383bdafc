//! What one logical stream of a connection is doing: publishing or playing a stream path.

use crate::fanout::FanoutQueue;
use crate::gop_cache::GopCache;
use crate::media::{MediaKind, MediaPacket};
use crate::stream_path::StreamPath;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identifies a connection for the lifetime of the process
pub type SessionId = u64;

/// Sent from other connections to the connection owning a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberSignal {
    /// The stream being played lost its publisher
    PublisherGone { stream_id: u32 },
}

/// Everything a joining player needs before it can decode live tags
#[derive(Debug)]
struct MediaCache {
    metadata: Option<MediaPacket>,
    audio_header: Option<MediaPacket>,
    video_header: Option<MediaPacket>,
    gop: GopCache,
}

/// A stream path being published by one logical stream of one connection
#[derive(Debug)]
pub struct PublishContext {
    session_id: SessionId,
    stream_id: u32,
    path: StreamPath,
    started_at: Instant,
    cache: Mutex<MediaCache>,
}

impl PublishContext {
    pub fn new(session_id: SessionId, stream_id: u32, path: StreamPath, gop: GopCache) -> PublishContext {
        PublishContext {
            session_id,
            stream_id,
            path,
            started_at: Instant::now(),
            cache: Mutex::new(MediaCache {
                metadata: None,
                audio_header: None,
                video_header: None,
                gop,
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn path(&self) -> &StreamPath {
        &self.path
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Caches the packet where a joining player will need it and queues it for every subscriber
    /// that currently wants it.  Returns how many subscribers it was queued for.
    ///
    /// The cache lock is held until every subscriber has been offered the packet.  Priming takes
    /// the same lock, so a subscriber sees each packet either in its replay or live, never both
    /// and never neither.
    pub fn ingest(&self, packet: MediaPacket, subscribers: &[Arc<SubscribeContext>]) -> usize {
        let mut cache = self.cache.lock();
        match packet.kind {
            MediaKind::Metadata => cache.metadata = Some(packet.clone()),
            MediaKind::Audio if packet.is_sequence_header => cache.audio_header = Some(packet.clone()),
            MediaKind::Video if packet.is_sequence_header => cache.video_header = Some(packet.clone()),
            _ => cache.gop.push(&packet),
        }

        let mut queued = 0;
        for subscriber in subscribers {
            if subscriber.wants(packet.kind) && subscriber.queue.enqueue(packet.clone()) {
                queued += 1;
            }
        }

        queued
    }

    /// Queues the cached metadata, sequence headers and GOP for the subscriber, then lets live
    /// packets through to it.  Used both when a player joins and when it unpauses.
    pub fn prime(&self, subscriber: &SubscribeContext) {
        let cache = self.cache.lock();
        let cached = cache
            .metadata
            .iter()
            .chain(cache.audio_header.iter())
            .chain(cache.video_header.iter())
            .chain(cache.gop.packets().iter());

        let mut replayed = 0;
        for packet in cached {
            if subscriber.media_enabled(packet.kind) {
                subscriber.queue.enqueue(packet.clone());
                replayed += 1;
            }
        }

        subscriber.paused.store(false, Ordering::Release);
        subscriber.initialized.store(true, Ordering::Release);

        tracing::debug!(
            path = %self.path,
            session = subscriber.session_id,
            stream_id = subscriber.stream_id,
            replayed,
            "Primed subscriber from cache"
        );
    }

    /// Number of tags in the current GOP
    pub fn cached_gop_len(&self) -> usize {
        self.cache.lock().gop.len()
    }

    /// Drops everything cached, releasing the claims it held
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.metadata = None;
        cache.audio_header = None;
        cache.video_header = None;
        cache.gop.clear();
    }
}

/// A stream path being played by one logical stream of one connection
#[derive(Debug)]
pub struct SubscribeContext {
    session_id: SessionId,
    stream_id: u32,
    path: StreamPath,
    paused: AtomicBool,
    receive_audio: AtomicBool,
    receive_video: AtomicBool,
    initialized: AtomicBool,
    queue: FanoutQueue,
    signals: mpsc::UnboundedSender<SubscriberSignal>,
    cancellation: CancellationToken,
}

impl SubscribeContext {
    pub fn new(
        session_id: SessionId,
        stream_id: u32,
        path: StreamPath,
        queue: FanoutQueue,
        signals: mpsc::UnboundedSender<SubscriberSignal>,
        cancellation: CancellationToken,
    ) -> SubscribeContext {
        SubscribeContext {
            session_id,
            stream_id,
            path,
            paused: AtomicBool::new(false),
            receive_audio: AtomicBool::new(true),
            receive_video: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            queue,
            signals,
            cancellation,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn path(&self) -> &StreamPath {
        &self.path
    }

    pub fn queue(&self) -> &FanoutQueue {
        &self.queue
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Stops live delivery.  Resuming goes through [`PublishContext::prime`] so the player gets a
    /// decodable starting point again.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resumes without a replay, for when there is no publisher to replay from
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn set_receive_audio(&self, enabled: bool) {
        self.receive_audio.store(enabled, Ordering::Release);
    }

    pub fn set_receive_video(&self, enabled: bool) {
        self.receive_video.store(enabled, Ordering::Release);
    }

    /// Tells the owning connection its publisher is gone.  False when that connection is
    /// already closed.
    pub fn notify_publisher_gone(&self) -> bool {
        self.signals
            .send(SubscriberSignal::PublisherGone {
                stream_id: self.stream_id,
            })
            .is_ok()
    }

    /// Stops the subscriber's drain worker, which releases whatever is still queued
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    fn wants(&self, kind: MediaKind) -> bool {
        self.is_initialized() && !self.is_paused() && self.media_enabled(kind)
    }

    fn media_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.receive_audio.load(Ordering::Acquire),
            MediaKind::Video => self.receive_video.load(Ordering::Acquire),
            MediaKind::Metadata => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{channel, DiscardThresholds, FanoutReceiver};
    use ingest_amf0::Amf0Value;
    use ingest_rtmp::buffers::BufferPool;
    use ingest_rtmp::time::RtmpTimestamp;
    use std::collections::HashMap;

    const THRESHOLDS: DiscardThresholds = DiscardThresholds {
        max_bytes: 1_000_000,
        max_packets: 1000,
    };

    fn publisher() -> PublishContext {
        PublishContext::new(1, 1, StreamPath::parse("live", "key"), GopCache::new(100))
    }

    fn subscriber() -> (Arc<SubscribeContext>, FanoutReceiver, mpsc::UnboundedReceiver<SubscriberSignal>) {
        let (queue, receiver) = channel(THRESHOLDS);
        let (signals, signal_receiver) = mpsc::unbounded_channel();
        let context = SubscribeContext::new(
            2,
            1,
            StreamPath::parse("live", "key"),
            queue,
            signals,
            CancellationToken::new(),
        );

        (Arc::new(context), receiver, signal_receiver)
    }

    fn video(pool: &BufferPool, first_byte: u8, packet_type: u8, timestamp: u32) -> MediaPacket {
        let mut builder = pool.rent(4);
        builder.extend_from_slice(&[first_byte, packet_type, 0, 0]);
        MediaPacket::video(RtmpTimestamp::new(timestamp), builder.freeze())
    }

    fn audio(pool: &BufferPool, packet_type: u8, timestamp: u32) -> MediaPacket {
        let mut builder = pool.rent(3);
        builder.extend_from_slice(&[0xAF, packet_type, 0]);
        MediaPacket::audio(RtmpTimestamp::new(timestamp), builder.freeze())
    }

    fn metadata() -> MediaPacket {
        let mut properties = HashMap::new();
        properties.insert("width".to_string(), Amf0Value::Number(640.0));
        MediaPacket::metadata(RtmpTimestamp::new(0), properties).unwrap()
    }

    fn received(receiver: &mut FanoutReceiver) -> Vec<(MediaKind, u32, bool)> {
        let mut packets = Vec::new();
        while let Some(packet) = receiver.try_recv() {
            packets.push((packet.kind, packet.timestamp.value, packet.is_sequence_header));
        }

        packets
    }

    #[test]
    fn uninitialized_subscriber_gets_no_live_packets() {
        let pool = BufferPool::new(16, 64);
        let publisher = publisher();
        let (subscriber, mut receiver, _signals) = subscriber();

        let queued = publisher.ingest(video(&pool, 0x17, 1, 0), &[subscriber.clone()]);

        assert_eq!(queued, 0);
        assert!(received(&mut receiver).is_empty());
    }

    #[test]
    fn joining_subscriber_gets_cache_before_live_packets() {
        let pool = BufferPool::new(32, 64);
        let publisher = publisher();
        let (subscriber, mut receiver, _signals) = subscriber();

        publisher.ingest(metadata(), &[]);
        publisher.ingest(video(&pool, 0x17, 0, 0), &[]);
        publisher.ingest(audio(&pool, 0, 0), &[]);
        publisher.ingest(video(&pool, 0x17, 1, 10), &[]);
        publisher.ingest(audio(&pool, 1, 15), &[]);
        publisher.ingest(video(&pool, 0x27, 1, 20), &[]);

        publisher.prime(&subscriber);
        publisher.ingest(video(&pool, 0x27, 1, 30), &[subscriber.clone()]);

        assert_eq!(
            received(&mut receiver),
            vec![
                (MediaKind::Metadata, 0, false),
                (MediaKind::Audio, 0, true),
                (MediaKind::Video, 0, true),
                (MediaKind::Video, 10, false),
                (MediaKind::Audio, 15, false),
                (MediaKind::Video, 20, false),
                (MediaKind::Video, 30, false),
            ]
        );
    }

    #[test]
    fn paused_subscriber_is_replayed_from_key_frame_on_resume() {
        let pool = BufferPool::new(32, 64);
        let publisher = publisher();
        let (subscriber, mut receiver, _signals) = subscriber();
        let subscribers = [subscriber.clone()];

        publisher.prime(&subscriber);
        publisher.ingest(video(&pool, 0x17, 1, 0), &subscribers);
        subscriber.pause();
        publisher.ingest(video(&pool, 0x27, 1, 10), &subscribers);
        assert_eq!(received(&mut receiver), vec![(MediaKind::Video, 0, false)]);

        publisher.prime(&subscriber);
        publisher.ingest(video(&pool, 0x27, 1, 20), &subscribers);

        assert!(!subscriber.is_paused());
        assert_eq!(
            received(&mut receiver),
            vec![
                (MediaKind::Video, 0, false),
                (MediaKind::Video, 10, false),
                (MediaKind::Video, 20, false),
            ]
        );
    }

    #[test]
    fn disabled_media_kind_is_not_delivered() {
        let pool = BufferPool::new(32, 64);
        let publisher = publisher();
        let (subscriber, mut receiver, _signals) = subscriber();
        let subscribers = [subscriber.clone()];

        publisher.prime(&subscriber);
        subscriber.set_receive_audio(false);
        publisher.ingest(audio(&pool, 1, 0), &subscribers);
        publisher.ingest(video(&pool, 0x17, 1, 0), &subscribers);

        assert_eq!(received(&mut receiver), vec![(MediaKind::Video, 0, false)]);
    }

    #[test]
    fn clear_releases_cached_claims() {
        let pool = BufferPool::new(32, 64);
        let publisher = publisher();

        publisher.ingest(video(&pool, 0x17, 0, 0), &[]);
        publisher.ingest(video(&pool, 0x17, 1, 0), &[]);
        publisher.ingest(video(&pool, 0x27, 1, 10), &[]);
        assert_eq!(pool.stats().outstanding(), 3);
        assert_eq!(publisher.cached_gop_len(), 2);

        publisher.clear();

        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn publisher_gone_signal_carries_stream_id() {
        let (subscriber, _receiver, mut signals) = subscriber();

        assert!(subscriber.notify_publisher_gone());
        assert_eq!(signals.try_recv().unwrap(), SubscriberSignal::PublisherGone { stream_id: 1 });
    }
}
