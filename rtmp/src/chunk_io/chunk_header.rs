use crate::time::RtmpTimestamp;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ChunkHeaderFormat {
    Full,                            // Format 0
    TimeDeltaWithoutMessageStreamId, // Format 1
    TimeDeltaOnly,                   // Format 2
    Empty,                           // Format 3
}

const FORMAT_MASK: u8 = 0b1100_0000;

impl ChunkHeaderFormat {
    pub fn from_basic_header(byte: u8) -> ChunkHeaderFormat {
        match (byte & FORMAT_MASK) >> 6 {
            0 => ChunkHeaderFormat::Full,
            1 => ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId,
            2 => ChunkHeaderFormat::TimeDeltaOnly,
            _ => ChunkHeaderFormat::Empty,
        }
    }

    pub fn basic_header_bits(&self) -> u8 {
        match self {
            ChunkHeaderFormat::Full => 0b0000_0000,
            ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId => 0b0100_0000,
            ChunkHeaderFormat::TimeDeltaOnly => 0b1000_0000,
            ChunkHeaderFormat::Empty => 0b1100_0000,
        }
    }

    /// Size of the message header that follows the basic header
    pub fn message_header_size(&self) -> usize {
        match self {
            ChunkHeaderFormat::Full => 11,
            ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId => 7,
            ChunkHeaderFormat::TimeDeltaOnly => 3,
            ChunkHeaderFormat::Empty => 0,
        }
    }
}

/// The header values in effect on a chunk stream
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    pub chunk_stream_id: u32,
    pub timestamp: RtmpTimestamp,

    /// The raw 24 bit timestamp (or delta) field last seen, which decides whether an extended
    /// timestamp follows a type 3 header
    pub timestamp_field: u32,

    /// The delta a type 3 header starting a new message re-applies.  After a type 0 header this
    /// is the absolute timestamp.
    pub timestamp_delta: u32,
    pub message_length: u32,
    pub message_type_id: u8,
    pub message_stream_id: u32,
}

impl ChunkHeader {
    pub fn new(chunk_stream_id: u32) -> ChunkHeader {
        ChunkHeader {
            chunk_stream_id,
            timestamp: RtmpTimestamp::new(0),
            timestamp_field: 0,
            timestamp_delta: 0,
            message_length: 0,
            message_type_id: 0,
            message_stream_id: 0,
        }
    }
}
