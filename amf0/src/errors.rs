use std::{io, string};
use thiserror::Error;

/// Errors that can occur while reading AMF0 values out of a byte stream
#[derive(Debug, Error)]
pub enum Amf0DeserializationError {
    /// The type marker byte did not match any AMF0 type this crate understands
    #[error("Encountered unknown AMF0 type marker {marker}")]
    UnknownMarker { marker: u8 },

    /// The stream ended in the middle of a value
    #[error("Hit the end of the byte buffer but was expecting more data")]
    UnexpectedEof,

    #[error("A string value was not valid utf8: {0}")]
    FromUtf8Error(#[from] string::FromUtf8Error),

    #[error("{0}")]
    Io(io::Error),
}

impl From<io::Error> for Amf0DeserializationError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => Amf0DeserializationError::UnexpectedEof,
            _ => Amf0DeserializationError::Io(error),
        }
    }
}

/// Errors that can occur while encoding AMF0 values
#[derive(Debug, Error)]
pub enum Amf0SerializationError {
    /// Short strings (and object property names) carry a 16 bit length prefix
    #[error("String of {length} bytes is longer than the 65,535 bytes allowed")]
    NormalStringTooLong { length: usize },

    #[error("{0}")]
    Io(#[from] io::Error),
}
