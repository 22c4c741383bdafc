use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::messages::{MessageDeserializationError, MessageSerializationError};
use crate::messages::{RtmpMessage, UserControlEventType};
use crate::time::RtmpTimestamp;

pub fn serialize(
    event_type: UserControlEventType,
    stream_id: Option<u32>,
    buffer_length: Option<u32>,
    timestamp: Option<RtmpTimestamp>,
) -> Result<Vec<u8>, MessageSerializationError> {
    let mut bytes = Vec::with_capacity(10);
    bytes.write_u16::<BigEndian>(event_id(event_type))?;

    match event_type {
        UserControlEventType::PingRequest | UserControlEventType::PingResponse => {
            debug_assert!(timestamp.is_some(), "Ping event serialized without a timestamp");
            bytes.write_u32::<BigEndian>(timestamp.map_or(0, |x| x.value))?;
        }

        UserControlEventType::SetBufferLength => {
            debug_assert!(buffer_length.is_some(), "Buffer length event serialized without a length");
            bytes.write_u32::<BigEndian>(stream_id.unwrap_or(0))?;
            bytes.write_u32::<BigEndian>(buffer_length.unwrap_or(0))?;
        }

        _ => {
            debug_assert!(stream_id.is_some(), "Stream event serialized without a stream id");
            bytes.write_u32::<BigEndian>(stream_id.unwrap_or(0))?;
        }
    }

    Ok(bytes)
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let event_type = match cursor.read_u16::<BigEndian>()? {
        0 => UserControlEventType::StreamBegin,
        1 => UserControlEventType::StreamEof,
        2 => UserControlEventType::StreamDry,
        3 => UserControlEventType::SetBufferLength,
        4 => UserControlEventType::StreamIsRecorded,
        6 => UserControlEventType::PingRequest,
        7 => UserControlEventType::PingResponse,
        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    let mut stream_id = None;
    let mut buffer_length = None;
    let mut timestamp = None;

    match event_type {
        UserControlEventType::PingRequest | UserControlEventType::PingResponse => {
            timestamp = Some(RtmpTimestamp::new(cursor.read_u32::<BigEndian>()?));
        }

        UserControlEventType::SetBufferLength => {
            stream_id = Some(cursor.read_u32::<BigEndian>()?);
            buffer_length = Some(cursor.read_u32::<BigEndian>()?);
        }

        _ => stream_id = Some(cursor.read_u32::<BigEndian>()?),
    }

    Ok(RtmpMessage::UserControl {
        event_type,
        stream_id,
        buffer_length,
        timestamp,
    })
}

fn event_id(event_type: UserControlEventType) -> u16 {
    match event_type {
        UserControlEventType::StreamBegin => 0,
        UserControlEventType::StreamEof => 1,
        UserControlEventType::StreamDry => 2,
        UserControlEventType::SetBufferLength => 3,
        UserControlEventType::StreamIsRecorded => 4,
        UserControlEventType::PingRequest => 6,
        UserControlEventType::PingResponse => 7,
    }
}
