//! Media tags as they flow from a publisher to its subscribers.

use ingest_amf0::Amf0Value;
use ingest_rtmp::buffers::RentedBuffer;
use ingest_rtmp::messages::{MessageSerializationError, RtmpMessage};
use ingest_rtmp::time::RtmpTimestamp;
use std::collections::HashMap;

const FLV_VIDEO_CODEC_AVC: u8 = 7;
const FLV_VIDEO_CODEC_HEVC: u8 = 12;
const FLV_AUDIO_FORMAT_AAC: u8 = 10;
const FLV_FRAME_TYPE_KEY: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Metadata,
}

impl MediaKind {
    /// RTMP message type id the tag travels in
    pub fn message_type_id(self) -> u8 {
        match self {
            MediaKind::Audio => 8,
            MediaKind::Video => 9,
            MediaKind::Metadata => 18,
        }
    }
}

/// One media tag.  Cloning shares the payload, so every clone holds a claim on the pooled buffer
/// until it is dropped.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub kind: MediaKind,
    pub timestamp: RtmpTimestamp,
    pub data: RentedBuffer,
    pub is_sequence_header: bool,
    pub is_key_frame: bool,
}

impl MediaPacket {
    pub fn video(timestamp: RtmpTimestamp, data: RentedBuffer) -> MediaPacket {
        MediaPacket {
            kind: MediaKind::Video,
            timestamp,
            is_sequence_header: is_video_sequence_header(&data),
            is_key_frame: is_video_keyframe(&data),
            data,
        }
    }

    pub fn audio(timestamp: RtmpTimestamp, data: RentedBuffer) -> MediaPacket {
        MediaPacket {
            kind: MediaKind::Audio,
            timestamp,
            is_sequence_header: is_audio_sequence_header(&data),
            is_key_frame: false,
            data,
        }
    }

    /// Encodes the publisher's `onMetaData` properties the way players expect to receive them
    pub fn metadata(
        timestamp: RtmpTimestamp,
        properties: HashMap<String, Amf0Value>,
    ) -> Result<MediaPacket, MessageSerializationError> {
        let message = RtmpMessage::Amf0Data {
            values: vec![
                Amf0Value::Utf8String("onMetaData".to_string()),
                Amf0Value::EcmaArray(properties),
            ],
        };

        let payload = message.into_message_payload(timestamp, 0)?;
        Ok(MediaPacket {
            kind: MediaKind::Metadata,
            timestamp,
            data: payload.data,
            is_sequence_header: false,
            is_key_frame: false,
        })
    }

    /// Interframes and plain audio frames may be dropped for a slow subscriber.  Everything a
    /// decoder needs to resynchronize may not.
    pub fn is_skippable(&self) -> bool {
        self.kind != MediaKind::Metadata && !self.is_sequence_header && !self.is_key_frame
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn is_video_sequence_header(data: &[u8]) -> bool {
    data.len() >= 2 && has_sequence_headers(data[0]) && data[1] == 0x00
}

fn is_video_keyframe(data: &[u8]) -> bool {
    // Sequence headers carry the key frame nibble too but aren't pictures
    !data.is_empty() && data[0] >> 4 == FLV_FRAME_TYPE_KEY && !is_video_sequence_header(data)
}

fn is_audio_sequence_header(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] >> 4 == FLV_AUDIO_FORMAT_AAC && data[1] == 0x00
}

/// Codecs whose second byte is a packet type that can mark a sequence header
fn has_sequence_headers(first_byte: u8) -> bool {
    let codec = first_byte & 0x0F;
    codec == FLV_VIDEO_CODEC_AVC || codec == FLV_VIDEO_CODEC_HEVC
}
