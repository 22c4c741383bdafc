//! Reading and writing the RTMP chunk stream.
//!
//! Messages are split into chunks no larger than the negotiated chunk size, and chunks from
//! different chunk streams (sub-channels) may be interleaved on the wire.  Each chunk header only
//! carries the fields that changed since the previous chunk on the same chunk stream, so both
//! directions keep per chunk stream state for the whole life of the connection.

mod chunk_header;
mod deserializer;
mod errors;
mod serializer;

pub use self::deserializer::ChunkDeserializer;
pub use self::errors::{ChunkDeserializationError, ChunkSerializationError};
pub use self::serializer::{ChunkSerializer, Packet};

/// Chunk size both sides use until a `SetChunkSize` message says otherwise
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Largest chunk size a `SetChunkSize` message can carry (31 bits)
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

/// Largest message length a chunk header can describe (24 bits)
pub const MAX_MESSAGE_LENGTH: usize = 16_777_215;

/// Timestamp field value signalling that a 4 byte extended timestamp follows the header
pub(crate) const EXTENDED_TIMESTAMP_MARKER: u32 = 0x00FF_FFFF;

/// Chunk stream ids that fit in each basic header width
pub const MIN_CHUNK_STREAM_ID: u32 = 2;
pub const MAX_CHUNK_STREAM_ID: u32 = 65_599;
