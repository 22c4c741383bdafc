use ingest_amf0::Amf0Value;
use std::io::Cursor;

use crate::messages::{MessageDeserializationError, MessageSerializationError, RtmpMessage};

pub fn serialize(values: &[Amf0Value]) -> Result<Vec<u8>, MessageSerializationError> {
    Ok(ingest_amf0::serialize(values)?)
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let values = ingest_amf0::deserialize(&mut cursor)?;

    Ok(RtmpMessage::Amf0Data { values })
}
