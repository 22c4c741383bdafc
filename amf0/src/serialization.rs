//! Encodes AMF0 values into bytes.

use crate::errors::Amf0SerializationError;
use crate::markers;
use crate::Amf0Value;
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::HashMap;

/// Serializes a sequence of values into one AMF0 encoded buffer
pub fn serialize(values: &[Amf0Value]) -> Result<Vec<u8>, Amf0SerializationError> {
    let mut bytes = Vec::new();
    for value in values {
        write_value(value, &mut bytes)?;
    }

    Ok(bytes)
}

fn write_value(value: &Amf0Value, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    match value {
        Amf0Value::Number(number) => {
            bytes.push(markers::NUMBER_MARKER);
            bytes.write_f64::<BigEndian>(*number)?;
        }

        Amf0Value::Boolean(flag) => {
            bytes.push(markers::BOOLEAN_MARKER);
            bytes.push(*flag as u8);
        }

        Amf0Value::Utf8String(text) => {
            if text.len() > u16::MAX as usize {
                bytes.push(markers::LONG_STRING_MARKER);
                bytes.write_u32::<BigEndian>(text.len() as u32)?;
                bytes.extend_from_slice(text.as_bytes());
            } else {
                bytes.push(markers::STRING_MARKER);
                write_short_string(text, bytes)?;
            }
        }

        Amf0Value::Object(properties) => {
            bytes.push(markers::OBJECT_MARKER);
            write_properties(properties, bytes)?;
        }

        Amf0Value::EcmaArray(properties) => {
            bytes.push(markers::ECMA_ARRAY_MARKER);
            bytes.write_u32::<BigEndian>(properties.len() as u32)?;
            write_properties(properties, bytes)?;
        }

        Amf0Value::StrictArray(values) => {
            bytes.push(markers::STRICT_ARRAY_MARKER);
            bytes.write_u32::<BigEndian>(values.len() as u32)?;
            for value in values {
                write_value(value, bytes)?;
            }
        }

        Amf0Value::Null => bytes.push(markers::NULL_MARKER),
        Amf0Value::Undefined => bytes.push(markers::UNDEFINED_MARKER),
    }

    Ok(())
}

fn write_short_string(text: &str, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    if text.len() > u16::MAX as usize {
        return Err(Amf0SerializationError::NormalStringTooLong { length: text.len() });
    }

    bytes.write_u16::<BigEndian>(text.len() as u16)?;
    bytes.extend_from_slice(text.as_bytes());
    Ok(())
}

fn write_properties(
    properties: &HashMap<String, Amf0Value>,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    for (name, value) in properties {
        write_short_string(name, bytes)?;
        write_value(value, bytes)?;
    }

    bytes.write_u16::<BigEndian>(markers::UTF_8_EMPTY_MARKER)?;
    bytes.push(markers::OBJECT_END_MARKER);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_serialize_number() {
        let result = serialize(&[Amf0Value::Number(332.0)]).unwrap();

        let mut expected = vec![markers::NUMBER_MARKER];
        expected.write_f64::<BigEndian>(332.0).unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn can_serialize_object_with_end_marker() {
        let mut properties = HashMap::new();
        properties.insert("code".to_string(), Amf0Value::Null);

        let result = serialize(&[Amf0Value::Object(properties)]).unwrap();

        let mut expected = vec![markers::OBJECT_MARKER];
        expected.write_u16::<BigEndian>(4).unwrap();
        expected.extend_from_slice(b"code");
        expected.push(markers::NULL_MARKER);
        expected.write_u16::<BigEndian>(0).unwrap();
        expected.push(markers::OBJECT_END_MARKER);
        assert_eq!(result, expected);
    }

    #[test]
    fn oversized_property_name_is_rejected() {
        let mut properties = HashMap::new();
        properties.insert("a".repeat(70_000), Amf0Value::Null);

        match serialize(&[Amf0Value::Object(properties)]) {
            Err(Amf0SerializationError::NormalStringTooLong { length: 70_000 }) => (),
            x => panic!("Expected NormalStringTooLong, received {:?}", x),
        }
    }

    #[test]
    fn long_strings_use_long_string_marker() {
        let text = "b".repeat(70_000);
        let result = serialize(&[Amf0Value::Utf8String(text)]).unwrap();

        assert_eq!(result[0], markers::LONG_STRING_MARKER);
        assert_eq!(result.len(), 1 + 4 + 70_000);
    }
}
