use crate::bitrate::BandwidthExceeded;
use crate::fanout::FanoutError;
use ingest_rtmp::handshake::HandshakeError;
use ingest_rtmp::messages::MessageSerializationError;
use ingest_rtmp::sessions::ServerSessionError;
use std::time::Duration;
use thiserror::Error;

/// Reasons a connection ended other than the client hanging up
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Handshake was not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RTMP session error: {0}")]
    Session(#[from] ServerSessionError),

    #[error(transparent)]
    BandwidthExceeded(#[from] BandwidthExceeded),

    #[error("Failed to start subscriber delivery: {0}")]
    Fanout(#[from] FanoutError),

    #[error("Failed to encode metadata for subscribers: {0}")]
    Metadata(#[from] MessageSerializationError),

    #[error("Connection writer shut down")]
    WriterClosed,
}
