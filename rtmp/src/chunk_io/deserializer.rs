use super::chunk_header::{ChunkHeader, ChunkHeaderFormat};
use super::{ChunkDeserializationError, DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP_MARKER, MAX_CHUNK_SIZE};
use crate::buffers::{BufferBuilder, BufferPool};
use crate::messages::MessagePayload;
use crate::time::RtmpTimestamp;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;

/// Turns the inbound chunk stream back into complete message payloads.
///
/// Every byte received after the handshake must go through the same deserializer, since chunk
/// headers depend on the chunks that came before them on the same chunk stream.
pub struct ChunkDeserializer {
    max_chunk_size: u32,
    chunk_size_limit: u32,
    buffer: BytesMut,
    sub_channels: HashMap<u32, SubChannelState>,
    pool: Option<BufferPool>,
}

/// What is known about one chunk stream
struct SubChannelState {
    header: ChunkHeader,

    /// Payload of the message being assembled.  `None` means the next chunk starts a new message.
    payload: Option<BufferBuilder>,
}

/// A chunk whose header has been fully parsed and whose payload is fully buffered
struct ParsedChunk {
    header: ChunkHeader,
    header_length: usize,
    payload_length: usize,
}

impl ChunkDeserializer {
    /// Creates a deserializer expecting the default 128 byte chunks and assembling payloads into
    /// plain allocations
    pub fn new() -> ChunkDeserializer {
        ChunkDeserializer {
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_size_limit: MAX_CHUNK_SIZE,
            buffer: BytesMut::with_capacity(4096),
            sub_channels: HashMap::new(),
            pool: None,
        }
    }

    /// Creates a deserializer that refuses chunk sizes above `chunk_size_limit`
    pub fn with_chunk_size_limit(chunk_size_limit: u32) -> ChunkDeserializer {
        ChunkDeserializer {
            chunk_size_limit: chunk_size_limit.min(MAX_CHUNK_SIZE),
            ..ChunkDeserializer::new()
        }
    }

    /// Creates a deserializer that assembles payloads into buffers rented from `pool` and refuses
    /// chunk sizes above `chunk_size_limit`
    pub fn with_pool(pool: BufferPool, chunk_size_limit: u32) -> ChunkDeserializer {
        ChunkDeserializer {
            pool: Some(pool),
            ..ChunkDeserializer::with_chunk_size_limit(chunk_size_limit)
        }
    }

    /// Attempts to read one complete message.
    ///
    /// Bytes passed in are buffered, so the same bytes must never be passed twice.  Only the first
    /// complete message is returned; callers loop with an empty slice until `None` comes back.
    /// Looping this way matters because a `SetChunkSize` message must be applied with
    /// `set_max_chunk_size()` before the chunks that follow it are read.
    pub fn get_next_message(
        &mut self,
        bytes: &[u8],
    ) -> Result<Option<MessagePayload>, ChunkDeserializationError> {
        self.buffer.extend_from_slice(bytes);

        loop {
            let chunk = match self.parse_chunk()? {
                Some(chunk) => chunk,
                None => return Ok(None),
            };

            if let Some(message) = self.consume_chunk(chunk) {
                return Ok(Some(message));
            }
        }
    }

    /// Applies a chunk size announced by the peer
    pub fn set_max_chunk_size(&mut self, new_size: u32) -> Result<(), ChunkDeserializationError> {
        if new_size == 0 || new_size > self.chunk_size_limit {
            return Err(ChunkDeserializationError::InvalidMaxChunkSize {
                chunk_size: new_size,
                limit: self.chunk_size_limit,
            });
        }

        self.max_chunk_size = new_size;
        Ok(())
    }

    pub fn get_max_chunk_size(&self) -> u32 {
        self.max_chunk_size
    }

    /// Discards the partially received message on the chunk stream, if any
    pub fn abort_message(&mut self, chunk_stream_id: u32) {
        if let Some(state) = self.sub_channels.get_mut(&chunk_stream_id) {
            state.payload = None;
        }
    }

    /// Parses the next chunk without consuming anything, returning `None` until the whole chunk
    /// (header and payload) is buffered
    fn parse_chunk(&self) -> Result<Option<ParsedChunk>, ChunkDeserializationError> {
        let buffer = &self.buffer[..];
        if buffer.is_empty() {
            return Ok(None);
        }

        let format = ChunkHeaderFormat::from_basic_header(buffer[0]);
        let (csid, mut index) = match read_chunk_stream_id(buffer) {
            Some(value) => value,
            None => return Ok(None),
        };

        if buffer.len() < index + format.message_header_size() {
            return Ok(None);
        }

        let previous = self.sub_channels.get(&csid);
        let in_progress_length = previous
            .and_then(|state| state.payload.as_ref())
            .map(|payload| payload.len());

        let mut header = match (format, previous) {
            (ChunkHeaderFormat::Full, _) => ChunkHeader::new(csid),
            (_, Some(state)) => state.header.clone(),
            (_, None) => return Err(ChunkDeserializationError::NoPreviousChunkOnStream { csid }),
        };

        let starts_new_message = in_progress_length.is_none();
        let resets_message = matches!(
            format,
            ChunkHeaderFormat::Full | ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId
        );

        if resets_message && !starts_new_message {
            return Err(ChunkDeserializationError::InterruptedMessage { csid });
        }

        if format != ChunkHeaderFormat::Empty {
            header.timestamp_field = BigEndian::read_u24(&buffer[index..]);
            index += 3;
        }

        if resets_message {
            header.message_length = BigEndian::read_u24(&buffer[index..]);
            header.message_type_id = buffer[index + 3];
            index += 4;
        }

        if format == ChunkHeaderFormat::Full {
            header.message_stream_id = LittleEndian::read_u32(&buffer[index..]);
            index += 4;
        }

        let mut timestamp_value = header.timestamp_field;
        if header.timestamp_field == EXTENDED_TIMESTAMP_MARKER {
            if buffer.len() < index + 4 {
                return Ok(None);
            }

            timestamp_value = BigEndian::read_u32(&buffer[index..]);
            index += 4;
        }

        match format {
            ChunkHeaderFormat::Full => {
                header.timestamp = RtmpTimestamp::new(timestamp_value);
                header.timestamp_delta = timestamp_value;
            }

            ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId | ChunkHeaderFormat::TimeDeltaOnly => {
                // A type 2 header in the middle of a message carries no new information
                if starts_new_message {
                    header.timestamp = header.timestamp + timestamp_value;
                    header.timestamp_delta = timestamp_value;
                }
            }

            ChunkHeaderFormat::Empty => {
                // Continuation chunks must not re-apply the delta, only a type 3 chunk that
                // starts a new message does
                if starts_new_message {
                    header.timestamp = header.timestamp + header.timestamp_delta;
                }
            }
        }

        let received = in_progress_length.unwrap_or(0);
        let remaining = (header.message_length as usize).saturating_sub(received);
        let payload_length = remaining.min(self.max_chunk_size as usize);
        if buffer.len() < index + payload_length {
            return Ok(None);
        }

        Ok(Some(ParsedChunk {
            header,
            header_length: index,
            payload_length,
        }))
    }

    fn consume_chunk(&mut self, chunk: ParsedChunk) -> Option<MessagePayload> {
        self.buffer.advance(chunk.header_length);
        let chunk_payload = self.buffer.split_to(chunk.payload_length);

        let csid = chunk.header.chunk_stream_id;
        let message_length = chunk.header.message_length as usize;
        let pool = &self.pool;
        let state = self.sub_channels.entry(csid).or_insert_with(|| SubChannelState {
            header: ChunkHeader::new(csid),
            payload: None,
        });

        state.header = chunk.header;
        let payload = state.payload.get_or_insert_with(|| match pool {
            Some(pool) => pool.rent(message_length),
            None => BufferBuilder::unpooled(message_length),
        });

        payload.extend_from_slice(&chunk_payload);
        if payload.len() < message_length {
            return None;
        }

        let data = state.payload.take()?.freeze();
        Some(MessagePayload {
            timestamp: state.header.timestamp,
            type_id: state.header.message_type_id,
            message_stream_id: state.header.message_stream_id,
            data,
        })
    }
}

impl Default for ChunkDeserializer {
    fn default() -> Self {
        ChunkDeserializer::new()
    }
}

/// Reads the chunk stream id out of a 1, 2 or 3 byte basic header
fn read_chunk_stream_id(buffer: &[u8]) -> Option<(u32, usize)> {
    const CSID_MASK: u8 = 0b0011_1111;

    match buffer.first()? & CSID_MASK {
        0 => {
            let extra = *buffer.get(1)?;
            Some((extra as u32 + 64, 2))
        }

        1 => {
            let low = *buffer.get(1)?;
            let high = *buffer.get(2)?;
            Some(((high as u32) * 256 + low as u32 + 64, 3))
        }

        csid => Some((csid as u32, 1)),
    }
}
