use super::queue::FanoutReceiver;
use crate::media::MediaPacket;
use ingest_rtmp::chunk_io::{ChunkSerializationError, ChunkSerializer, Packet};
use ingest_rtmp::messages::MessagePayload;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// First chunk stream id handed to subscribers.  Lower ids belong to the session's own messages.
const FIRST_SUBSCRIBER_CHUNK_STREAM_ID: u32 = 8;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("Failed to serialize media for subscriber: {0}")]
    Serialization(#[from] ChunkSerializationError),
}

/// Turns a subscriber's queued media into chunks on the subscriber's own chunk stream and hands
/// them to the connection writer, strictly in queue order.
pub struct FanoutWorker {
    queue: FanoutReceiver,
    serializer: ChunkSerializer,
    chunk_stream_id: u32,
    message_stream_id: u32,
    writer: mpsc::Sender<Packet>,
    cancellation: CancellationToken,
}

impl FanoutWorker {
    /// `chunk_size` must be the size already announced to the subscriber's client
    pub fn new(
        queue: FanoutReceiver,
        chunk_size: u32,
        message_stream_id: u32,
        writer: mpsc::Sender<Packet>,
        cancellation: CancellationToken,
    ) -> Result<FanoutWorker, FanoutError> {
        Ok(FanoutWorker {
            queue,
            serializer: ChunkSerializer::with_announced_chunk_size(chunk_size)?,
            chunk_stream_id: subscriber_chunk_stream_id(message_stream_id),
            message_stream_id,
            writer,
            cancellation,
        })
    }

    pub async fn run(mut self) -> Result<(), FanoutError> {
        let mut result = Ok(());
        loop {
            let packet = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break,
                packet = self.queue.receiver.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            self.queue.counters.removed(packet.len());
            let outbound = match self.serialize(packet) {
                Ok(outbound) => outbound,
                Err(error) => {
                    result = Err(error);
                    break;
                }
            };

            // A full writer channel parks this worker, which lets the queue back up and the
            // discard policy kick in
            let sent = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => false,
                delivered = self.writer.send(outbound) => delivered.is_ok(),
            };

            if !sent {
                break;
            }
        }

        self.drain();
        result
    }

    fn serialize(&mut self, packet: MediaPacket) -> Result<Packet, FanoutError> {
        let payload = MessagePayload {
            timestamp: packet.timestamp,
            type_id: packet.kind.message_type_id(),
            message_stream_id: self.message_stream_id,
            data: packet.data,
        };

        Ok(self.serializer.serialize_on(self.chunk_stream_id, &payload, false)?)
    }

    /// Releases everything still queued without sending it
    fn drain(&mut self) {
        self.queue.receiver.close();
        let mut released = 0;
        while let Ok(packet) = self.queue.receiver.try_recv() {
            self.queue.counters.removed(packet.len());
            released += 1;
        }

        if released > 0 {
            tracing::debug!(
                stream_id = self.message_stream_id,
                released,
                "Released queued packets of a removed subscriber"
            );
        }
    }
}

/// Each logical stream of a connection gets its own chunk stream so media for different
/// subscriptions never shares header compression state
pub fn subscriber_chunk_stream_id(message_stream_id: u32) -> u32 {
    FIRST_SUBSCRIBER_CHUNK_STREAM_ID + message_stream_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{channel, DiscardThresholds};
    use ingest_rtmp::buffers::BufferPool;
    use ingest_rtmp::chunk_io::ChunkDeserializer;
    use ingest_rtmp::time::RtmpTimestamp;

    fn thresholds() -> DiscardThresholds {
        DiscardThresholds {
            max_bytes: 1_000_000,
            max_packets: 1000,
        }
    }

    fn packet(pool: &BufferPool, first_byte: u8, timestamp: u32) -> MediaPacket {
        let mut builder = pool.rent(4);
        builder.extend_from_slice(&[first_byte, 0x01, 0xAA, 0xBB]);
        MediaPacket::video(RtmpTimestamp::new(timestamp), builder.freeze())
    }

    #[tokio::test]
    async fn delivers_packets_in_order_on_subscriber_chunk_stream() {
        let pool = BufferPool::new(16, 64);
        let (queue, receiver) = channel(thresholds());
        let (writer, mut written) = mpsc::channel(16);
        let token = CancellationToken::new();
        let worker = FanoutWorker::new(receiver, 128, 1, writer, token.clone()).unwrap();
        let handle = tokio::spawn(worker.run());

        queue.enqueue(packet(&pool, 0x17, 10));
        queue.enqueue(packet(&pool, 0x27, 20));

        let mut deserializer = ChunkDeserializer::new();
        for expected_timestamp in [10, 20] {
            let outbound = written.recv().await.unwrap();
            assert_eq!(outbound.bytes[0] & 0x3F, 9, "Expected chunk stream id 9");

            let payload = deserializer.get_next_message(&outbound.bytes).unwrap().unwrap();
            assert_eq!(payload.type_id, 9);
            assert_eq!(payload.message_stream_id, 1);
            assert_eq!(payload.timestamp, RtmpTimestamp::new(expected_timestamp));
        }

        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.counters().outstanding().packets, 0);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn cancelled_worker_releases_queued_packets() {
        let pool = BufferPool::new(16, 64);
        let (queue, receiver) = channel(thresholds());
        let (writer, _written) = mpsc::channel(1);
        let token = CancellationToken::new();

        for timestamp in 0..5 {
            queue.enqueue(packet(&pool, 0x17, timestamp));
        }

        token.cancel();
        let worker = FanoutWorker::new(receiver, 128, 1, writer, token).unwrap();
        worker.run().await.unwrap();

        assert_eq!(queue.counters().outstanding().packets, 0);
        assert_eq!(pool.stats().outstanding(), 0, "Every queued claim must be released");
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn serialization_failure_still_releases_the_backlog() {
        let pool = BufferPool::new(16, 64);
        let (queue, receiver) = channel(thresholds());
        let (writer, _written) = mpsc::channel(16);

        for timestamp in 0..3 {
            queue.enqueue(packet(&pool, 0x17, timestamp));
        }

        // Lands past the last chunk stream id the serializer can encode
        let worker = FanoutWorker::new(receiver, 128, 70_000, writer, CancellationToken::new()).unwrap();
        let result = worker.run().await;

        assert!(matches!(
            result,
            Err(FanoutError::Serialization(ChunkSerializationError::InvalidChunkStreamId { .. }))
        ));
        assert_eq!(queue.counters().outstanding(), Default::default());
        assert_eq!(pool.stats().outstanding(), 0);
        assert!(queue.is_closed());
    }
}
