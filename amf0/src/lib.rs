//! Serialization and deserialization of values encoded with Adobe's Action Message Format 0.
//!
//! RTMP command messages (`connect`, `publish`, `play`, ...) and data messages (`onMetaData`)
//! carry their bodies as a flat sequence of AMF0 values.  This crate models those values as
//! [`Amf0Value`] and converts between them and their binary form.
//!
//! # Examples
//! ```
//! use std::collections::HashMap;
//! use std::io::Cursor;
//! use ingest_amf0::{deserialize, serialize, Amf0Value};
//!
//! let mut properties = HashMap::new();
//! properties.insert("app".to_string(), Amf0Value::Utf8String("live".to_string()));
//!
//! let input = vec![
//!     Amf0Value::Utf8String("connect".to_string()),
//!     Amf0Value::Number(1.0),
//!     Amf0Value::Object(properties),
//! ];
//!
//! let bytes = serialize(&input).unwrap();
//! let output = deserialize(&mut Cursor::new(bytes)).unwrap();
//! assert_eq!(input, output);
//! ```

mod deserialization;
mod errors;
mod serialization;

pub use deserialization::deserialize;
pub use errors::{Amf0DeserializationError, Amf0SerializationError};
pub use serialization::serialize;

use std::collections::HashMap;

/// A single AMF0 encoded value
#[derive(PartialEq, Debug, Clone)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    Utf8String(String),
    Object(HashMap<String, Amf0Value>),

    /// An associative array.  Encoders frequently use this in place of an object for
    /// `onMetaData` payloads, so it is kept distinct to re-encode it the way it was received.
    EcmaArray(HashMap<String, Amf0Value>),
    StrictArray(Vec<Amf0Value>),
    Null,
    Undefined,
}

impl Amf0Value {
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Amf0Value::Number(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match *self {
            Amf0Value::Boolean(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::Utf8String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the properties of an object or associative array
    pub fn as_properties(&self) -> Option<&HashMap<String, Amf0Value>> {
        match self {
            Amf0Value::Object(properties) | Amf0Value::EcmaArray(properties) => Some(properties),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Amf0Value::Utf8String(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_properties(self) -> Option<HashMap<String, Amf0Value>> {
        match self {
            Amf0Value::Object(properties) | Amf0Value::EcmaArray(properties) => Some(properties),
            _ => None,
        }
    }
}

mod markers {
    pub const NUMBER_MARKER: u8 = 0;
    pub const BOOLEAN_MARKER: u8 = 1;
    pub const STRING_MARKER: u8 = 2;
    pub const OBJECT_MARKER: u8 = 3;
    pub const NULL_MARKER: u8 = 5;
    pub const UNDEFINED_MARKER: u8 = 6;
    pub const ECMA_ARRAY_MARKER: u8 = 8;
    pub const OBJECT_END_MARKER: u8 = 9;
    pub const STRICT_ARRAY_MARKER: u8 = 10;
    pub const DATE_MARKER: u8 = 11;
    pub const LONG_STRING_MARKER: u8 = 12;
    pub const UTF_8_EMPTY_MARKER: u16 = 0;
}
