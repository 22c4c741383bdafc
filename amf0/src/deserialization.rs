//! Reads AMF0 encoded values out of any byte source.

use crate::errors::Amf0DeserializationError;
use crate::markers;
use crate::Amf0Value;
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Read;

/// Reads every AMF0 value available in the byte source, stopping at the end of the input
pub fn deserialize<R: Read>(bytes: &mut R) -> Result<Vec<Amf0Value>, Amf0DeserializationError> {
    let mut results = Vec::new();
    while let Some(marker) = read_marker(bytes)? {
        results.push(read_value(marker, bytes)?);
    }

    Ok(results)
}

fn read_marker<R: Read>(bytes: &mut R) -> Result<Option<u8>, Amf0DeserializationError> {
    let mut buffer = [0_u8; 1];
    match bytes.read(&mut buffer)? {
        0 => Ok(None),
        _ => Ok(Some(buffer[0])),
    }
}

fn read_value<R: Read>(marker: u8, bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    match marker {
        markers::NUMBER_MARKER => Ok(Amf0Value::Number(bytes.read_f64::<BigEndian>()?)),
        markers::BOOLEAN_MARKER => Ok(Amf0Value::Boolean(bytes.read_u8()? != 0)),
        markers::STRING_MARKER => Ok(Amf0Value::Utf8String(read_short_string(bytes)?)),
        markers::LONG_STRING_MARKER => {
            let length = bytes.read_u32::<BigEndian>()? as usize;
            Ok(Amf0Value::Utf8String(read_string_of_length(bytes, length)?))
        }

        markers::OBJECT_MARKER => Ok(Amf0Value::Object(read_properties(bytes)?)),
        markers::ECMA_ARRAY_MARKER => {
            // The declared count is unreliable across encoders; the array is always
            // terminated by the same end marker objects use.
            let _count = bytes.read_u32::<BigEndian>()?;
            Ok(Amf0Value::EcmaArray(read_properties(bytes)?))
        }

        markers::STRICT_ARRAY_MARKER => {
            let count = bytes.read_u32::<BigEndian>()?;
            let mut values = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let marker = read_marker(bytes)?.ok_or(Amf0DeserializationError::UnexpectedEof)?;
                values.push(read_value(marker, bytes)?);
            }

            Ok(Amf0Value::StrictArray(values))
        }

        markers::DATE_MARKER => {
            let milliseconds = bytes.read_f64::<BigEndian>()?;
            let _timezone = bytes.read_i16::<BigEndian>()?;
            Ok(Amf0Value::Number(milliseconds))
        }

        markers::NULL_MARKER => Ok(Amf0Value::Null),
        markers::UNDEFINED_MARKER => Ok(Amf0Value::Undefined),
        marker => Err(Amf0DeserializationError::UnknownMarker { marker }),
    }
}

fn read_properties<R: Read>(
    bytes: &mut R,
) -> Result<HashMap<String, Amf0Value>, Amf0DeserializationError> {
    let mut properties = HashMap::new();
    loop {
        let name = read_short_string(bytes)?;
        let marker = read_marker(bytes)?.ok_or(Amf0DeserializationError::UnexpectedEof)?;
        if name.is_empty() && marker == markers::OBJECT_END_MARKER {
            break;
        }

        let value = read_value(marker, bytes)?;
        properties.insert(name, value);
    }

    Ok(properties)
}

fn read_short_string<R: Read>(bytes: &mut R) -> Result<String, Amf0DeserializationError> {
    let length = bytes.read_u16::<BigEndian>()? as usize;
    read_string_of_length(bytes, length)
}

fn read_string_of_length<R: Read>(
    bytes: &mut R,
    length: usize,
) -> Result<String, Amf0DeserializationError> {
    // The length comes off the wire, so only allocate for what is actually there
    let mut buffer = Vec::new();
    bytes.by_ref().take(length as u64).read_to_end(&mut buffer)?;
    if buffer.len() != length {
        return Err(Amf0DeserializationError::UnexpectedEof);
    }

    Ok(String::from_utf8(buffer)?)
}
