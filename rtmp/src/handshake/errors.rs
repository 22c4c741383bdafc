use std::io;
use thiserror::Error;

/// Failures that abort a handshake.  None of them are recoverable; the connection should be
/// closed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The first byte from the peer was not the RTMP version we speak
    #[error("First byte of the handshake was version {version}, but only version 3 is supported")]
    BadVersionId { version: u8 },

    /// The peer's echo did not carry our time field back
    #[error("Peer did not send the correct time back")]
    IncorrectPeerTime,

    /// The peer's echo did not carry our random bytes back, and was not a valid digest response
    #[error("Peer did not send the correct random data back")]
    IncorrectRandomData,

    #[error("The handshake has already been completed")]
    HandshakeAlreadyCompleted,

    /// The outbound greeting can only be generated once, and only by the client
    #[error("The outbound greeting cannot be generated in the current stage")]
    GreetingNotExpected,

    #[error("Unable to create an HMAC-SHA256 instance for the digest handshake")]
    InvalidDigestKey,

    #[error("{0}")]
    Io(#[from] io::Error),
}
