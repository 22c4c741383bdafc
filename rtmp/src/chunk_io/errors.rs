use crate::messages::MessageSerializationError;
use std::io;
use thiserror::Error;

/// Failures while reading the inbound chunk stream.  All of them are protocol violations.
#[derive(Debug, Error)]
pub enum ChunkDeserializationError {
    /// Compressed chunk headers reuse fields from the previous chunk on the same chunk stream,
    /// which requires a full header to have been seen first.
    #[error(
        "Received chunk with non-zero chunk type on csid {csid} prior to receiving a type 0 chunk"
    )]
    NoPreviousChunkOnStream { csid: u32 },

    /// A header that starts a new message arrived before the previous message on the same chunk
    /// stream was complete
    #[error("Received a new message header on csid {csid} while a message was still being assembled")]
    InterruptedMessage { csid: u32 },

    /// The peer asked for a chunk size of zero or beyond what this side accepts
    #[error("Requested an invalid max chunk size of {chunk_size}.  Chunk sizes must be between 1 and {limit}")]
    InvalidMaxChunkSize { chunk_size: u32, limit: u32 },

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Failures while turning messages into chunks
#[derive(Debug, Error)]
pub enum ChunkSerializationError {
    /// A message cannot be longer than the 24 bit length field allows
    #[error("The current message has a length of {size} bytes, which is over the allowed size of 16777215 bytes")]
    MessageTooLong { size: usize },

    #[error("An invalid chunk size of {attempted_chunk_size} was specified.  Chunk size must be greater than 0 and less than 2147483648")]
    InvalidMaxChunkSize { attempted_chunk_size: u32 },

    #[error("Chunk stream id {csid} is outside of the 2 to 65599 range")]
    InvalidChunkStreamId { csid: u32 },

    #[error("Failed to create SetChunkSize message: {0}")]
    SetChunkSizeMessageCreationFailure(#[from] MessageSerializationError),

    #[error("{0}")]
    Io(#[from] io::Error),
}
