use super::types::{amf0_command, amf0_data, control, user_control};
use super::{MessageDeserializationError, MessageSerializationError, RtmpMessage};
use crate::buffers::RentedBuffer;
use crate::time::RtmpTimestamp;

/// Represents a raw RTMP message
#[derive(PartialEq, Debug, Clone)]
pub struct MessagePayload {
    pub timestamp: RtmpTimestamp,
    pub type_id: u8,
    pub message_stream_id: u32,
    pub data: RentedBuffer,
}

impl MessagePayload {
    pub fn new() -> MessagePayload {
        MessagePayload {
            timestamp: RtmpTimestamp::new(0),
            message_stream_id: 0,
            type_id: 0,
            data: RentedBuffer::empty(),
        }
    }

    /// Decodes the payload.  Audio, video and unknown messages share the payload's buffer instead
    /// of copying it.
    pub fn to_rtmp_message(&self) -> Result<RtmpMessage, MessageDeserializationError> {
        match self.type_id {
            1 | 2 | 3 | 5 | 6 => control::deserialize(self.type_id, &self.data),
            4 => user_control::deserialize(&self.data),
            8 => Ok(RtmpMessage::AudioData {
                data: self.data.clone(),
            }),
            9 => Ok(RtmpMessage::VideoData {
                data: self.data.clone(),
            }),
            18 => amf0_data::deserialize(&self.data),
            20 => amf0_command::deserialize(&self.data),
            _ => Ok(RtmpMessage::Unknown {
                type_id: self.type_id,
                data: self.data.clone(),
            }),
        }
    }

    pub fn from_rtmp_message(
        message: RtmpMessage,
        timestamp: RtmpTimestamp,
        message_stream_id: u32,
    ) -> Result<MessagePayload, MessageSerializationError> {
        let type_id = message.get_message_type_id();

        let data = match message {
            RtmpMessage::Unknown { data, .. } => data,
            RtmpMessage::AudioData { data } => data,
            RtmpMessage::VideoData { data } => data,

            RtmpMessage::Abort { stream_id } => control::serialize_u32(stream_id)?.into(),

            RtmpMessage::Acknowledgement { sequence_number } => {
                control::serialize_u32(sequence_number)?.into()
            }

            RtmpMessage::WindowAcknowledgement { size } => control::serialize_u32(size)?.into(),

            RtmpMessage::SetChunkSize { size } => control::serialize_set_chunk_size(size)?.into(),

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                control::serialize_set_peer_bandwidth(size, limit_type)?.into()
            }

            RtmpMessage::UserControl {
                event_type,
                stream_id,
                buffer_length,
                timestamp,
            } => user_control::serialize(event_type, stream_id, buffer_length, timestamp)?.into(),

            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                additional_arguments,
            } => amf0_command::serialize(
                command_name,
                transaction_id,
                command_object,
                additional_arguments,
            )?
            .into(),

            RtmpMessage::Amf0Data { values } => amf0_data::serialize(&values)?.into(),
        };

        Ok(MessagePayload {
            timestamp,
            type_id,
            message_stream_id,
            data,
        })
    }
}

impl Default for MessagePayload {
    fn default() -> Self {
        MessagePayload::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::BufferPool;
    use crate::messages::{PeerBandwidthLimitType, UserControlEventType};
    use ingest_amf0::Amf0Value;

    fn through_payload(message: RtmpMessage) -> (MessagePayload, RtmpMessage) {
        let payload = message.into_message_payload(RtmpTimestamp::new(55), 52).unwrap();
        let decoded = payload.to_rtmp_message().unwrap();
        (payload, decoded)
    }

    #[test]
    fn payload_carries_timestamp_stream_id_and_type() {
        let (payload, _) = through_payload(RtmpMessage::Abort { stream_id: 23 });

        assert_eq!(payload.type_id, 2, "Incorrect type id");
        assert_eq!(payload.message_stream_id, 52, "Incorrect message stream id");
        assert_eq!(payload.timestamp, 55, "Incorrect timestamp");
        assert_eq!(&payload.data[..], &[0, 0, 0, 23]);
    }

    #[test]
    fn control_and_command_messages_decode_back() {
        let messages = vec![
            RtmpMessage::SetChunkSize { size: 4096 },
            RtmpMessage::SetPeerBandwidth {
                size: 2_500_000,
                limit_type: PeerBandwidthLimitType::Dynamic,
            },
            RtmpMessage::UserControl {
                event_type: UserControlEventType::StreamBegin,
                stream_id: Some(1),
                buffer_length: None,
                timestamp: None,
            },
            RtmpMessage::Amf0Command {
                command_name: "_result".to_string(),
                transaction_id: 2.0,
                command_object: Amf0Value::Null,
                additional_arguments: vec![Amf0Value::Number(1.0)],
            },
        ];

        for message in messages {
            let (_, decoded) = through_payload(message.clone());
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn media_messages_share_the_payload_buffer() {
        let pool = BufferPool::new(2, 1024);
        let mut builder = pool.rent(3);
        builder.extend_from_slice(&[0x17, 0x01, 0x00]);
        let buffer = builder.freeze();

        let payload = RtmpMessage::VideoData { data: buffer.clone() }
            .into_message_payload(RtmpTimestamp::new(0), 1)
            .unwrap();

        assert_eq!(payload.type_id, 9);
        assert!(payload.data.is_pooled());

        match payload.to_rtmp_message().unwrap() {
            RtmpMessage::VideoData { data } => assert_eq!(data.claim_count(), 3),
            x => panic!("Expected VideoData, got {:?}", x),
        }
    }

    #[test]
    fn unknown_type_ids_are_preserved() {
        let payload = MessagePayload {
            timestamp: RtmpTimestamp::new(0),
            type_id: 33,
            message_stream_id: 0,
            data: RentedBuffer::from(vec![1, 2]),
        };

        match payload.to_rtmp_message().unwrap() {
            RtmpMessage::Unknown { type_id, data } => {
                assert_eq!(type_id, 33);
                assert_eq!(&data[..], &[1, 2]);
            }

            x => panic!("Expected Unknown, got {:?}", x),
        }
    }
}
