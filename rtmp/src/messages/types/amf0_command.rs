use ingest_amf0::Amf0Value;
use std::io::Cursor;

use crate::messages::{MessageDeserializationError, MessageSerializationError, RtmpMessage};

pub fn serialize(
    command_name: String,
    transaction_id: f64,
    command_object: Amf0Value,
    additional_arguments: Vec<Amf0Value>,
) -> Result<Vec<u8>, MessageSerializationError> {
    let mut values = Vec::with_capacity(additional_arguments.len() + 3);
    values.push(Amf0Value::Utf8String(command_name));
    values.push(Amf0Value::Number(transaction_id));
    values.push(command_object);
    values.extend(additional_arguments);

    Ok(ingest_amf0::serialize(&values)?)
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let mut values = ingest_amf0::deserialize(&mut cursor)?.into_iter();

    let command_name = match values.next() {
        Some(Amf0Value::Utf8String(value)) => value,
        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    let transaction_id = match values.next() {
        Some(Amf0Value::Number(value)) => value,
        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    // Some encoders leave off the command object entirely when it would be null
    let command_object = values.next().unwrap_or(Amf0Value::Null);

    Ok(RtmpMessage::Amf0Command {
        command_name,
        transaction_id,
        command_object,
        additional_arguments: values.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn can_serialize_message() {
        let mut properties = HashMap::new();
        properties.insert("app".to_string(), Amf0Value::Utf8String("live".to_string()));

        let bytes = serialize(
            "connect".to_string(),
            1.0,
            Amf0Value::Object(properties.clone()),
            vec![Amf0Value::Boolean(true)],
        )
        .unwrap();

        let result = ingest_amf0::deserialize(&mut Cursor::new(bytes)).unwrap();
        let expected = vec![
            Amf0Value::Utf8String("connect".to_string()),
            Amf0Value::Number(1.0),
            Amf0Value::Object(properties),
            Amf0Value::Boolean(true),
        ];

        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_message() {
        let values = vec![
            Amf0Value::Utf8String("publish".to_string()),
            Amf0Value::Number(5.0),
            Amf0Value::Null,
            Amf0Value::Utf8String("key".to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ];

        let bytes = ingest_amf0::serialize(&values).unwrap();
        let result = deserialize(&bytes).unwrap();

        let expected = RtmpMessage::Amf0Command {
            command_name: "publish".to_string(),
            transaction_id: 5.0,
            command_object: Amf0Value::Null,
            additional_arguments: vec![
                Amf0Value::Utf8String("key".to_string()),
                Amf0Value::Utf8String("live".to_string()),
            ],
        };

        assert_eq!(result, expected);
    }

    #[test]
    fn missing_command_object_defaults_to_null() {
        let values = vec![Amf0Value::Utf8String("getStreamLength".to_string()), Amf0Value::Number(3.0)];
        let bytes = ingest_amf0::serialize(&values).unwrap();

        match deserialize(&bytes).unwrap() {
            RtmpMessage::Amf0Command { command_object, additional_arguments, .. } => {
                assert_eq!(command_object, Amf0Value::Null);
                assert!(additional_arguments.is_empty());
            }

            x => panic!("Expected Amf0Command, got {:?}", x),
        }
    }

    #[test]
    fn command_without_name_is_invalid() {
        let bytes = ingest_amf0::serialize(&[Amf0Value::Number(3.0)]).unwrap();

        match deserialize(&bytes) {
            Err(MessageDeserializationError::InvalidMessageFormat) => (),
            x => panic!("Expected InvalidMessageFormat, got {:?}", x),
        }
    }
}
