/*!
This module contains all the RTMP message types as well as functionality for serializing
and deserializing these messages into payloads.

`MessagePayload`s carry the auxiliary data of an RTMP message: what message stream it is
meant for, its timestamp and its type.  Audio, video and unrecognized messages keep their
bytes in the same `RentedBuffer` the chunk deserializer assembled them into, so turning a
payload into a message and back never copies media.
*/

mod errors;
mod message_payload;
mod types;

pub use self::errors::{MessageDeserializationError, MessageSerializationError};
pub use self::message_payload::MessagePayload;

use crate::buffers::RentedBuffer;
use crate::time::RtmpTimestamp;
use ingest_amf0::Amf0Value;

/// The type of bandwidth limiting that is being requested
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum PeerBandwidthLimitType {
    /// Peer should limit its output bandwidth to the indicated window size
    Hard,

    /// The peer should limit its output bandwidth to the window indicated or the limit
    /// already in effect, whichever is smaller.
    Soft,

    /// If we previously had a hard limit, this limit should be treated as hard.  Otherwise ignore.
    Dynamic,
}

/// Events and notifications that are raised with the peer
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum UserControlEventType {
    /// Notifies the client that a stream has become functional
    StreamBegin,

    /// Notifies the client that the playback of data on the stream is over
    StreamEof,

    /// Notifies the client that there is no more data on the stream.
    StreamDry,

    /// Notifies the server of the buffer size (in milliseconds) that the client is using
    SetBufferLength,

    /// Notifies the client that the stream is a recorded stream.
    StreamIsRecorded,

    /// Server sends this to test whether the client is reachable.
    PingRequest,

    /// Client sends this in response to a ping request
    PingResponse,
}

/// An enumeration of all types of RTMP messages that are supported
#[derive(PartialEq, Debug, Clone)]
pub enum RtmpMessage {
    /// A message with a type id that we do not know about
    Unknown { type_id: u8, data: RentedBuffer },

    /// Notifies the peer that if it is waiting for chunks to complete a message that it should
    /// discard the chunks it has already received.
    Abort { stream_id: u32 },

    /// An acknowledgement sent to confirm how many bytes have been received so far
    Acknowledgement { sequence_number: u32 },

    /// A command being sent, encoded with amf0 values
    Amf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
    },

    /// A message containing an array of data encoded as amf0 values
    Amf0Data { values: Vec<Amf0Value> },

    /// A message containing audio data
    AudioData { data: RentedBuffer },

    /// Tells the peer that the maximum chunk size for RTMP chunks it will be sending is changing
    /// to the specified size.
    SetChunkSize { size: u32 },

    /// Indicates that the peer should limit its output bandwidth
    SetPeerBandwidth {
        size: u32,
        limit_type: PeerBandwidthLimitType,
    },

    /// Notifies the peer of an event, such as a stream being created or telling the peer how
    /// much of a buffer it should have.
    UserControl {
        event_type: UserControlEventType,
        stream_id: Option<u32>,
        buffer_length: Option<u32>,
        timestamp: Option<RtmpTimestamp>,
    },

    /// A message containing video data
    VideoData { data: RentedBuffer },

    /// Notifies the peer how many bytes should be received before sending an `Acknowledgement`
    /// message
    WindowAcknowledgement { size: u32 },
}

impl RtmpMessage {
    pub fn into_message_payload(
        self,
        timestamp: RtmpTimestamp,
        message_stream_id: u32,
    ) -> Result<MessagePayload, MessageSerializationError> {
        MessagePayload::from_rtmp_message(self, timestamp, message_stream_id)
    }

    pub fn get_message_type_id(&self) -> u8 {
        match self {
            RtmpMessage::Unknown { type_id, .. } => *type_id,
            RtmpMessage::SetChunkSize { .. } => 1,
            RtmpMessage::Abort { .. } => 2,
            RtmpMessage::Acknowledgement { .. } => 3,
            RtmpMessage::UserControl { .. } => 4,
            RtmpMessage::WindowAcknowledgement { .. } => 5,
            RtmpMessage::SetPeerBandwidth { .. } => 6,
            RtmpMessage::AudioData { .. } => 8,
            RtmpMessage::VideoData { .. } => 9,
            RtmpMessage::Amf0Data { .. } => 18,
            RtmpMessage::Amf0Command { .. } => 20,
        }
    }
}
