use super::chunk_header::{ChunkHeader, ChunkHeaderFormat};
use super::{
    ChunkSerializationError, DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP_MARKER, MAX_CHUNK_SIZE,
    MAX_CHUNK_STREAM_ID, MAX_MESSAGE_LENGTH, MIN_CHUNK_STREAM_ID,
};
use crate::messages::{MessagePayload, RtmpMessage};
use crate::time::RtmpTimestamp;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::collections::HashMap;

/// Chunk stream used for protocol control messages
const CONTROL_CHUNK_STREAM_ID: u32 = 2;

/// An outbound data packet containing one RTMP message split into one or more chunks
#[derive(Debug, PartialEq)]
pub struct Packet {
    pub bytes: Vec<u8>,
}

/// Allows serializing RTMP messages into RTMP chunks.
///
/// Due to the nature of the RTMP chunking protocol, the same serializer should be used
/// for all messages that need to be sent to the same peer, and every packet it produces must
/// actually be sent, in order.
pub struct ChunkSerializer {
    previous_headers: HashMap<u32, ChunkHeader>,
    max_chunk_size: u32,
}

impl ChunkSerializer {
    /// Creates a new `ChunkSerializer` that splits messages into 128 byte chunks until
    /// `set_max_chunk_size()` is called.
    pub fn new() -> ChunkSerializer {
        ChunkSerializer {
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            previous_headers: HashMap::new(),
        }
    }

    /// Creates a serializer for extra chunk streams on a connection whose outbound chunk size has
    /// already been announced to the peer by another serializer
    pub fn with_announced_chunk_size(size: u32) -> Result<ChunkSerializer, ChunkSerializationError> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ChunkSerializationError::InvalidMaxChunkSize {
                attempted_chunk_size: size,
            });
        }

        Ok(ChunkSerializer {
            max_chunk_size: size,
            previous_headers: HashMap::new(),
        })
    }

    /// Changes the maximum amount of message bytes a single chunk can carry.
    ///
    /// The peer has to be told about the change before any chunk using it arrives, so the returned
    /// packet contains the `SetChunkSize` message and *must* be sent before anything serialized
    /// afterwards.
    pub fn set_max_chunk_size(
        &mut self,
        new_size: u32,
        time: RtmpTimestamp,
    ) -> Result<Packet, ChunkSerializationError> {
        if new_size == 0 || new_size > MAX_CHUNK_SIZE {
            return Err(ChunkSerializationError::InvalidMaxChunkSize {
                attempted_chunk_size: new_size,
            });
        }

        let message = RtmpMessage::SetChunkSize { size: new_size };
        let payload = message.into_message_payload(time, 0)?;
        let packet = self.serialize_on(CONTROL_CHUNK_STREAM_ID, &payload, true)?;

        self.max_chunk_size = new_size;
        Ok(packet)
    }

    pub fn get_max_chunk_size(&self) -> u32 {
        self.max_chunk_size
    }

    /// Turns an RTMP message payload into RTMP chunks, on a chunk stream picked from the
    /// message's type.
    ///
    /// Chunk headers only carry what changed since the previous message on the same chunk
    /// stream.  Setting `force_uncompressed` always writes a full (type 0) header, which some
    /// clients require for the first messages after the handshake.
    pub fn serialize(
        &mut self,
        message: &MessagePayload,
        force_uncompressed: bool,
    ) -> Result<Packet, ChunkSerializationError> {
        let csid = get_csid_for_message_type(message.type_id);
        self.serialize_on(csid, message, force_uncompressed)
    }

    /// Same as `serialize()` but on an explicit chunk stream
    pub fn serialize_on(
        &mut self,
        chunk_stream_id: u32,
        message: &MessagePayload,
        force_uncompressed: bool,
    ) -> Result<Packet, ChunkSerializationError> {
        if !(MIN_CHUNK_STREAM_ID..=MAX_CHUNK_STREAM_ID).contains(&chunk_stream_id) {
            return Err(ChunkSerializationError::InvalidChunkStreamId {
                csid: chunk_stream_id,
            });
        }

        if message.data.len() > MAX_MESSAGE_LENGTH {
            return Err(ChunkSerializationError::MessageTooLong {
                size: message.data.len(),
            });
        }

        let mut header = ChunkHeader {
            chunk_stream_id,
            timestamp: message.timestamp,
            timestamp_field: 0,
            timestamp_delta: 0,
            message_length: message.data.len() as u32,
            message_type_id: message.type_id,
            message_stream_id: message.message_stream_id,
        };

        let format = match self.previous_headers.get(&chunk_stream_id) {
            Some(previous) if !force_uncompressed => {
                let format = get_header_format(&header, previous);
                match format {
                    ChunkHeaderFormat::Empty => {
                        header.timestamp_delta = previous.timestamp_delta;
                        header.timestamp_field = previous.timestamp_field;
                    }

                    _ => {
                        let delta = (header.timestamp - previous.timestamp).value;
                        header.timestamp_delta = delta;
                        header.timestamp_field = delta.min(EXTENDED_TIMESTAMP_MARKER);
                    }
                }

                format
            }

            _ => ChunkHeaderFormat::Full,
        };

        if format == ChunkHeaderFormat::Full {
            header.timestamp_delta = header.timestamp.value;
            header.timestamp_field = header.timestamp.value.min(EXTENDED_TIMESTAMP_MARKER);
        }

        let chunk_size = self.max_chunk_size as usize;
        let chunk_count = (message.data.len() + chunk_size - 1) / chunk_size;
        let mut bytes = Vec::with_capacity(message.data.len() + 18 + chunk_count * 7);

        let mut slices = message.data.chunks(chunk_size);
        write_header(&mut bytes, format, &header)?;
        bytes.extend_from_slice(slices.next().unwrap_or(&[]));

        // Continuation chunks are always type 3
        for slice in slices {
            write_header(&mut bytes, ChunkHeaderFormat::Empty, &header)?;
            bytes.extend_from_slice(slice);
        }

        self.previous_headers.insert(chunk_stream_id, header);
        Ok(Packet { bytes })
    }
}

impl Default for ChunkSerializer {
    fn default() -> Self {
        ChunkSerializer::new()
    }
}

fn get_header_format(current: &ChunkHeader, previous: &ChunkHeader) -> ChunkHeaderFormat {
    if current.message_stream_id != previous.message_stream_id
        || current.timestamp < previous.timestamp
    {
        return ChunkHeaderFormat::Full;
    }

    if current.message_type_id != previous.message_type_id
        || current.message_length != previous.message_length
    {
        return ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId;
    }

    let delta = (current.timestamp - previous.timestamp).value;
    if delta != previous.timestamp_delta {
        return ChunkHeaderFormat::TimeDeltaOnly;
    }

    ChunkHeaderFormat::Empty
}

fn write_header(
    bytes: &mut Vec<u8>,
    format: ChunkHeaderFormat,
    header: &ChunkHeader,
) -> Result<(), ChunkSerializationError> {
    write_basic_header(bytes, format, header.chunk_stream_id)?;

    if format != ChunkHeaderFormat::Empty {
        bytes.write_u24::<BigEndian>(header.timestamp_field)?;
    }

    if matches!(
        format,
        ChunkHeaderFormat::Full | ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId
    ) {
        bytes.write_u24::<BigEndian>(header.message_length)?;
        bytes.write_u8(header.message_type_id)?;
    }

    if format == ChunkHeaderFormat::Full {
        bytes.write_u32::<LittleEndian>(header.message_stream_id)?;
    }

    // Type 3 chunks inherit the timestamp field, so they repeat the extended timestamp too
    if header.timestamp_field == EXTENDED_TIMESTAMP_MARKER {
        bytes.write_u32::<BigEndian>(header.timestamp_delta)?;
    }

    Ok(())
}

fn write_basic_header(
    bytes: &mut Vec<u8>,
    format: ChunkHeaderFormat,
    csid: u32,
) -> Result<(), ChunkSerializationError> {
    let format_bits = format.basic_header_bits();
    match csid {
        x if x < 64 => bytes.write_u8(format_bits | x as u8)?,
        x if x < 320 => {
            bytes.write_u8(format_bits)?;
            bytes.write_u8((x - 64) as u8)?;
        }
        x => {
            bytes.write_u8(format_bits | 1)?;
            bytes.write_u16::<LittleEndian>((x - 64) as u16)?;
        }
    }

    Ok(())
}

fn get_csid_for_message_type(message_type_id: u8) -> u32 {
    // Spreading message kinds over chunk streams lets repeated messages compress their headers
    match message_type_id {
        1..=6 => 2,
        18 | 19 => 3,
        9 => 4,
        8 => 5,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::RentedBuffer;

    fn payload(timestamp: u32, type_id: u8, stream_id: u32, data: Vec<u8>) -> MessagePayload {
        MessagePayload {
            timestamp: RtmpTimestamp::new(timestamp),
            type_id,
            message_stream_id: stream_id,
            data: RentedBuffer::from(data),
        }
    }

    #[test]
    fn first_message_uses_type_0_header() {
        let message = payload(72, 9, 5, vec![1, 2, 3]);
        let mut serializer = ChunkSerializer::new();
        let packet = serializer.serialize(&message, false).unwrap();

        let expected = vec![
            0x04, // fmt 0, csid 4
            0x00, 0x00, 0x48, // timestamp
            0x00, 0x00, 0x03, // length
            0x09, // type
            0x05, 0x00, 0x00, 0x00, // stream id, little endian
            1, 2, 3,
        ];

        assert_eq!(packet.bytes, expected);
    }

    #[test]
    fn header_compression_follows_what_changed() {
        let mut serializer = ChunkSerializer::new();
        let _ = serializer.serialize(&payload(100, 9, 1, vec![1, 1]), false).unwrap();

        let new_delta = serializer.serialize(&payload(133, 9, 1, vec![2, 2]), false).unwrap();
        assert_eq!(new_delta.bytes[0] & 0b1100_0000, 0b1000_0000, "Expected type 2 header");
        assert_eq!(new_delta.bytes.len(), 1 + 3 + 2);

        let same_delta = serializer.serialize(&payload(166, 9, 1, vec![3, 3]), false).unwrap();
        assert_eq!(same_delta.bytes, vec![0xC4, 3, 3], "Expected type 3 header");

        let new_length = serializer.serialize(&payload(199, 9, 1, vec![4]), false).unwrap();
        assert_eq!(new_length.bytes[0] & 0b1100_0000, 0b0100_0000, "Expected type 1 header");
        assert_eq!(new_length.bytes.len(), 1 + 7 + 1);
    }

    #[test]
    fn full_header_used_when_stream_id_changes_or_time_goes_backwards() {
        let mut serializer = ChunkSerializer::new();
        let _ = serializer.serialize(&payload(100, 9, 1, vec![1]), false).unwrap();

        let other_stream = serializer.serialize(&payload(110, 9, 2, vec![1]), false).unwrap();
        assert_eq!(other_stream.bytes[0] & 0b1100_0000, 0);

        let backwards = serializer.serialize(&payload(50, 9, 2, vec![1]), false).unwrap();
        assert_eq!(backwards.bytes[0] & 0b1100_0000, 0);
    }

    #[test]
    fn force_uncompressed_always_writes_full_header() {
        let mut serializer = ChunkSerializer::new();
        let _ = serializer.serialize(&payload(100, 9, 1, vec![1]), false).unwrap();
        let packet = serializer.serialize(&payload(100, 9, 1, vec![1]), true).unwrap();

        assert_eq!(packet.bytes[0], 0x04);
        assert_eq!(packet.bytes.len(), 12 + 1);
    }

    #[test]
    fn large_messages_are_split_with_type_3_continuations() {
        let data: Vec<u8> = (0..300).map(|x| x as u8).collect();
        let mut serializer = ChunkSerializer::new();
        let packet = serializer.serialize(&payload(0, 8, 1, data.clone()), false).unwrap();

        let first_end = 12 + 128;
        assert_eq!(&packet.bytes[12..first_end], &data[..128]);
        assert_eq!(packet.bytes[first_end], 0xC5);
        assert_eq!(packet.bytes[first_end + 1 + 128], 0xC5);
        assert_eq!(packet.bytes.len(), 12 + 300 + 2);
    }

    #[test]
    fn extended_timestamp_repeated_on_continuation_chunks() {
        let mut serializer = ChunkSerializer::new();
        let packet = serializer.serialize(&payload(0x0100_0000, 8, 1, vec![0; 200]), false).unwrap();

        assert_eq!(&packet.bytes[1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&packet.bytes[12..16], &[0x01, 0x00, 0x00, 0x00]);

        let continuation = 16 + 128;
        assert_eq!(packet.bytes[continuation], 0xC5);
        assert_eq!(&packet.bytes[continuation + 1..continuation + 5], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn all_basic_header_widths_are_written() {
        let mut serializer = ChunkSerializer::new();
        let message = payload(0, 9, 1, vec![1]);

        let small = serializer.serialize_on(63, &message, false).unwrap();
        assert_eq!(small.bytes[0], 63);

        let medium = serializer.serialize_on(319, &message, false).unwrap();
        assert_eq!(&medium.bytes[..2], &[0, 255]);

        let large = serializer.serialize_on(65_599, &message, false).unwrap();
        assert_eq!(&large.bytes[..3], &[1, 255, 255]);
    }

    #[test]
    fn out_of_range_chunk_stream_ids_are_rejected() {
        let mut serializer = ChunkSerializer::new();
        let message = payload(0, 9, 1, vec![1]);

        for csid in [0, 1, 65_600] {
            match serializer.serialize_on(csid, &message, false) {
                Err(ChunkSerializationError::InvalidChunkStreamId { csid: x }) if x == csid => (),
                x => panic!("Expected InvalidChunkStreamId for {}, got {:?}", csid, x),
            }
        }
    }

    #[test]
    fn messages_over_24_bit_length_are_rejected() {
        let mut serializer = ChunkSerializer::new();
        let message = payload(0, 9, 1, vec![0; MAX_MESSAGE_LENGTH + 1]);

        match serializer.serialize(&message, false) {
            Err(ChunkSerializationError::MessageTooLong { size }) => assert_eq!(size, MAX_MESSAGE_LENGTH + 1),
            x => panic!("Expected MessageTooLong, got {:?}", x),
        }
    }

    #[test]
    fn set_max_chunk_size_announces_size_and_changes_chunking() {
        let mut serializer = ChunkSerializer::new();
        let packet = serializer.set_max_chunk_size(4096, RtmpTimestamp::new(0)).unwrap();

        assert_eq!(packet.bytes[0], 0x02);
        assert_eq!(packet.bytes[7], 1, "Expected SetChunkSize type id");
        assert_eq!(&packet.bytes[12..], &[0x00, 0x00, 0x10, 0x00]);
        assert_eq!(serializer.get_max_chunk_size(), 4096);

        let big = serializer.serialize(&payload(0, 9, 1, vec![0; 4000]), false).unwrap();
        assert_eq!(big.bytes.len(), 12 + 4000, "Should fit in a single chunk");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut serializer = ChunkSerializer::new();
        match serializer.set_max_chunk_size(0, RtmpTimestamp::new(0)) {
            Err(ChunkSerializationError::InvalidMaxChunkSize { attempted_chunk_size: 0 }) => (),
            x => panic!("Expected InvalidMaxChunkSize, got {:?}", x),
        }
    }
}
