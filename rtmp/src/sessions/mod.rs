/// This module contains the server session abstraction.
///
/// A session reacts to incoming RTMP messages (encoded as RTMP chunks) with packets to be sent
/// as a response, as well as raising events that applications can perform custom logic on.
mod server;

pub use self::server::{
    PlayStartValue, PublishMode, RequestRejection, ServerSession, ServerSessionConfig,
    ServerSessionError, ServerSessionEvent, ServerSessionResult,
};

use ingest_amf0::Amf0Value;
use std::collections::HashMap;

/// Contains the metadata information a stream may advertise on publishing
#[derive(PartialEq, Debug, Clone, Default)]
pub struct StreamMetadata {
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_codec: Option<String>,
    pub video_frame_rate: Option<f32>,
    pub video_bitrate_kbps: Option<u32>,
    pub audio_codec: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: Option<u32>,
    pub audio_is_stereo: Option<bool>,
    pub encoder: Option<String>,
}

impl StreamMetadata {
    /// Reads the well known `onMetaData` properties.  Anything unrecognized is ignored.
    pub fn from_properties(properties: &HashMap<String, Amf0Value>) -> StreamMetadata {
        let number = |key: &str| properties.get(key).and_then(|x| x.as_number());
        let text = |key: &str| {
            properties.get(key).and_then(|value| match value {
                Amf0Value::Utf8String(x) => Some(x.clone()),
                // Codec ids are numbers for some encoders and fourcc strings for others
                Amf0Value::Number(x) => Some(x.to_string()),
                _ => None,
            })
        };

        StreamMetadata {
            video_width: number("width").map(|x| x as u32),
            video_height: number("height").map(|x| x as u32),
            video_codec: text("videocodecid"),
            video_frame_rate: number("framerate").map(|x| x as f32),
            video_bitrate_kbps: number("videodatarate").map(|x| x as u32),
            audio_codec: text("audiocodecid"),
            audio_bitrate_kbps: number("audiodatarate").map(|x| x as u32),
            audio_sample_rate: number("audiosamplerate").map(|x| x as u32),
            audio_channels: number("audiochannels").map(|x| x as u32),
            audio_is_stereo: properties.get("stereo").and_then(|x| x.as_boolean()),
            encoder: text("encoder"),
        }
    }
}
