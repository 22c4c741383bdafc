use crate::chunk_io::{ChunkDeserializationError, ChunkSerializationError};
use crate::messages::{MessageDeserializationError, MessageSerializationError};
use thiserror::Error;

/// Errors that terminate a server session
#[derive(Debug, Error)]
pub enum ServerSessionError {
    /// Encountered when an error occurs while deserializing the incoming byte data
    #[error("An error occurred deserializing incoming data: {0}")]
    ChunkDeserializationError(#[from] ChunkDeserializationError),

    /// Encountered when an error occurs while serializing outbound messages
    #[error("An error occurred serializing outbound messages: {0}")]
    ChunkSerializationError(#[from] ChunkSerializationError),

    /// Encountered when an error occurs while turning an RTMP message into an message payload
    #[error("An error occurred while attempting to turn an RTMP message into a message payload: {0}")]
    MessageSerializationError(#[from] MessageSerializationError),

    /// Encountered when an error occurs while turning a message payload into an RTMP message
    #[error("An error occurred while attempting to turn a message payload into an RTMP message: {0}")]
    MessageDeserializationError(#[from] MessageDeserializationError),

    /// The request id specified did not match an outstanding request
    #[error("Attempted to accept or reject request id {0} but no outstanding requests have that id")]
    InvalidRequestId(u32),

    /// The client sent a second `connect` command on a session that already has a connection
    #[error("A connect command was received on a session that is already connected")]
    ConnectionAlreadyEstablished,

    /// An action was attempted to be performed on a stream id that was never created
    #[error("The '{action}' action was attempted on non-existent stream id {stream_id}")]
    ActionAttemptedOnInactiveStream { action: &'static str, stream_id: u32 },
}
