use super::PublishMode;
use crate::buffers::RentedBuffer;
use crate::sessions::StreamMetadata;
use crate::time::RtmpTimestamp;
use ingest_amf0::Amf0Value;
use std::collections::HashMap;

/// Represents where RTMP playback should start from
#[derive(PartialEq, Debug, Clone)]
pub enum PlayStartValue {
    /// If a live stream exists for the specified stream key play it, if not
    /// play the recorded stream with a matching name
    LiveOrRecorded,

    /// Only play live streams with the provided stream key
    LiveOnly,

    /// Play the recorded stream for the stream key at the specified start time
    StartTimeInSeconds(u32),
}

/// An event that a server session can raise
#[derive(Debug, PartialEq, Clone)]
pub enum ServerSessionEvent {
    /// The client is changing the maximum size of the RTMP chunks they will be sending
    ClientChunkSizeChanged { new_chunk_size: u32 },

    /// The client is requesting a connection on the specified RTMP application name
    ConnectionRequested { request_id: u32, app_name: String },

    /// The client is requesting the ability to publish on the specified stream key
    PublishStreamRequested {
        request_id: u32,
        app_name: String,
        stream_key: String,
        mode: PublishMode,
        stream_id: u32,
    },

    /// The client is finished publishing on the specified stream key
    PublishStreamFinished {
        app_name: String,
        stream_key: String,
        stream_id: u32,
    },

    /// The client is changing metadata properties of the stream being published.  The raw
    /// properties are kept so they can be relayed to players untouched.
    StreamMetadataChanged {
        app_name: String,
        stream_key: String,
        stream_id: u32,
        metadata: StreamMetadata,
        properties: HashMap<String, Amf0Value>,
    },

    /// Audio data was received from the client
    AudioDataReceived {
        app_name: String,
        stream_key: String,
        stream_id: u32,
        data: RentedBuffer,
        timestamp: RtmpTimestamp,
    },

    /// Video data received from the client
    VideoDataReceived {
        app_name: String,
        stream_key: String,
        stream_id: u32,
        data: RentedBuffer,
        timestamp: RtmpTimestamp,
    },

    /// The client sent an Amf0 command that was not able to be handled
    UnhandleableAmf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_values: Vec<Amf0Value>,
    },

    /// The client is requesting playback of the specified stream
    PlayStreamRequested {
        request_id: u32,
        app_name: String,
        stream_key: String,
        start_at: PlayStartValue,
        duration: Option<u32>,
        reset: bool,
        stream_id: u32,
    },

    /// The client is finished with playback of the specified stream
    PlayStreamFinished {
        app_name: String,
        stream_key: String,
        stream_id: u32,
    },

    /// The client paused or resumed playback
    PlayStreamPauseChanged {
        stream_key: String,
        stream_id: u32,
        paused: bool,
    },

    /// The client toggled whether it wants audio on a playing stream
    ReceiveAudioChanged {
        stream_key: String,
        stream_id: u32,
        enabled: bool,
    },

    /// The client toggled whether it wants video on a playing stream
    ReceiveVideoChanged {
        stream_key: String,
        stream_id: u32,
        enabled: bool,
    },

    /// The client has sent an acknowledgement that they have received the specified number of bytes
    AcknowledgementReceived { bytes_received: u32 },

    /// The client has responded to a ping request
    PingResponseReceived { timestamp: RtmpTimestamp },
}
