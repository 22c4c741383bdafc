//! Protocol control messages (type ids 1, 2, 3, 5 and 6).  All of them are a single big endian
//! `u32`, except set peer bandwidth which adds a limit type byte.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::messages::{MessageDeserializationError, MessageSerializationError};
use crate::messages::{PeerBandwidthLimitType, RtmpMessage};

const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

pub fn serialize_u32(value: u32) -> Result<Vec<u8>, MessageSerializationError> {
    let mut bytes = Vec::with_capacity(4);
    bytes.write_u32::<BigEndian>(value)?;
    Ok(bytes)
}

pub fn serialize_set_chunk_size(size: u32) -> Result<Vec<u8>, MessageSerializationError> {
    if size > MAX_CHUNK_SIZE {
        return Err(MessageSerializationError::InvalidChunkSize);
    }

    serialize_u32(size)
}

pub fn serialize_set_peer_bandwidth(
    size: u32,
    limit_type: PeerBandwidthLimitType,
) -> Result<Vec<u8>, MessageSerializationError> {
    let limit_type = match limit_type {
        PeerBandwidthLimitType::Hard => 0,
        PeerBandwidthLimitType::Soft => 1,
        PeerBandwidthLimitType::Dynamic => 2,
    };

    let mut bytes = serialize_u32(size)?;
    bytes.write_u8(limit_type)?;
    Ok(bytes)
}

pub fn deserialize(type_id: u8, data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let value = cursor.read_u32::<BigEndian>()?;

    let message = match type_id {
        // The first bit of a chunk size is always zero
        1 => RtmpMessage::SetChunkSize {
            size: value & MAX_CHUNK_SIZE,
        },
        2 => RtmpMessage::Abort { stream_id: value },
        3 => RtmpMessage::Acknowledgement {
            sequence_number: value,
        },
        5 => RtmpMessage::WindowAcknowledgement { size: value },
        6 => {
            let limit_type = match cursor.read_u8()? {
                0 => PeerBandwidthLimitType::Hard,
                1 => PeerBandwidthLimitType::Soft,
                2 => PeerBandwidthLimitType::Dynamic,
                _ => return Err(MessageDeserializationError::InvalidMessageFormat),
            };

            RtmpMessage::SetPeerBandwidth {
                size: value,
                limit_type,
            }
        }

        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_serialize_set_peer_bandwidth() {
        let bytes = serialize_set_peer_bandwidth(2_500_000, PeerBandwidthLimitType::Dynamic).unwrap();

        assert_eq!(bytes, vec![0x00, 0x26, 0x25, 0xA0, 2]);
    }

    #[test]
    fn set_chunk_size_ignores_high_bit() {
        let result = deserialize(1, &[0x80, 0x00, 0x10, 0x00]).unwrap();

        assert_eq!(result, RtmpMessage::SetChunkSize { size: 4096 });
    }

    #[test]
    fn set_chunk_size_above_31_bits_cannot_be_serialized() {
        match serialize_set_chunk_size(0x8000_0000) {
            Err(MessageSerializationError::InvalidChunkSize) => (),
            x => panic!("Expected InvalidChunkSize, got {:?}", x),
        }
    }

    #[test]
    fn can_deserialize_acknowledgement_and_window_size() {
        let ack = deserialize(3, &[0, 0, 1, 0]).unwrap();
        let window = deserialize(5, &[0, 0, 1, 0]).unwrap();

        assert_eq!(ack, RtmpMessage::Acknowledgement { sequence_number: 256 });
        assert_eq!(window, RtmpMessage::WindowAcknowledgement { size: 256 });
    }

    #[test]
    fn unknown_bandwidth_limit_type_is_invalid() {
        match deserialize(6, &[0, 0, 0, 1, 9]) {
            Err(MessageDeserializationError::InvalidMessageFormat) => (),
            x => panic!("Expected InvalidMessageFormat, got {:?}", x),
        }
    }

    #[test]
    fn truncated_control_message_is_an_io_error() {
        match deserialize(2, &[0, 0]) {
            Err(MessageDeserializationError::Io(_)) => (),
            x => panic!("Expected Io error, got {:?}", x),
        }
    }
}
