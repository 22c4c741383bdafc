mod active_stream;
mod commands;
mod config;
mod errors;
mod events;
mod outstanding_requests;
mod publish_mode;
mod rejection;
mod result;


use self::active_stream::{ActiveStream, StreamState};
use self::outstanding_requests::OutstandingRequest;
use crate::buffers::{BufferPool, RentedBuffer};
use crate::chunk_io::{ChunkDeserializer, ChunkSerializer};
use crate::messages::{MessagePayload, PeerBandwidthLimitType, RtmpMessage, UserControlEventType};
use crate::sessions::StreamMetadata;
use crate::time::RtmpTimestamp;
use ingest_amf0::Amf0Value;
use std::collections::HashMap;
use std::time::Instant;

pub use self::config::ServerSessionConfig;
pub use self::errors::ServerSessionError;
pub use self::events::{PlayStartValue, ServerSessionEvent};
pub use self::publish_mode::PublishMode;
pub use self::rejection::RequestRejection;
pub use self::result::ServerSessionResult;

/// A session that represents the server side of a single RTMP connection.
///
/// The `ServerSession` encapsulates the process of parsing RTMP chunks coming in from a client
/// into RTMP messages and performs common server side workflows to handle those messages.  It can
/// either provide pre-serialized messages to be sent back to the client or events that
/// parent applications can perform custom logic against (like verifying if a publish request
/// should be accepted or not).
///
/// The `ServerSession` does not care how RTMP chunks (encoded as bytes) come in or get sent out,
/// but leaves that up to the application utilizing the `ServerSession`.
///
/// Due to the header compression properties of the RTMP chunking protocol it is required that
/// all bytes **after** the handshake has been completed are passed into the `ServerSession` and
/// that all responses returned by the `ServerSession` are sent to the client **in order**.
/// Chunks produced by other serializers may be interleaved between responses as long as they
/// use chunk stream ids above 7.
pub struct ServerSession {
    start_time: Instant,
    config: ServerSessionConfig,
    serializer: ChunkSerializer,
    deserializer: ChunkDeserializer,
    connected_app_name: Option<String>,
    object_encoding: f64,
    outstanding_requests: HashMap<u32, OutstandingRequest>,
    next_request_number: u32,
    active_streams: HashMap<u32, ActiveStream>,
    next_stream_id: u32,
    bytes_received: u64,
    bytes_received_at_last_ack: u64,
    peer_window_ack_size: Option<u32>,
}

impl ServerSession {
    /// Creates a new server session.  Nothing is sent to the client until it asks to connect.
    pub fn new(config: ServerSessionConfig) -> ServerSession {
        let deserializer = ChunkDeserializer::with_chunk_size_limit(config.max_inbound_chunk_size);
        ServerSession::with_deserializer(config, deserializer)
    }

    /// Creates a new server session whose inbound messages are assembled in buffers rented from
    /// `pool`
    pub fn with_buffer_pool(config: ServerSessionConfig, pool: BufferPool) -> ServerSession {
        let deserializer = ChunkDeserializer::with_pool(pool, config.max_inbound_chunk_size);
        ServerSession::with_deserializer(config, deserializer)
    }

    fn with_deserializer(config: ServerSessionConfig, deserializer: ChunkDeserializer) -> ServerSession {
        ServerSession {
            start_time: Instant::now(),
            config,
            serializer: ChunkSerializer::new(),
            deserializer,
            connected_app_name: None,
            object_encoding: 0.0,
            outstanding_requests: HashMap::new(),
            next_request_number: 0,
            active_streams: HashMap::new(),
            next_stream_id: 1,
            bytes_received: 0,
            bytes_received_at_last_ack: 0,
            peer_window_ack_size: None,
        }
    }

    /// The application name the client connected on, if the connection was accepted
    pub fn app_name(&self) -> Option<&str> {
        self.connected_app_name.as_deref()
    }

    /// The chunk size every outbound chunk on this connection uses
    pub fn outbound_chunk_size(&self) -> u32 {
        self.serializer.get_max_chunk_size()
    }

    /// Takes in bytes that are encoding RTMP chunks and returns any responses or events that can
    /// be reacted to.
    pub fn handle_input(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.bytes_received += bytes.len() as u64;

        let mut results = Vec::new();
        let mut bytes_to_process = bytes;
        while let Some(payload) = self.deserializer.get_next_message(bytes_to_process)? {
            let mut message_results = self.handle_message(payload)?;
            results.append(&mut message_results);
            bytes_to_process = &[];
        }

        if let Some(ack) = self.acknowledge_if_window_crossed()? {
            results.push(ack);
        }

        Ok(results)
    }

    /// Tells the server session that it should accept an outstanding request
    pub fn accept_request(
        &mut self,
        request_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let request = self
            .outstanding_requests
            .remove(&request_id)
            .ok_or(ServerSessionError::InvalidRequestId(request_id))?;

        match request {
            OutstandingRequest::ConnectionRequest {
                app_name,
                transaction_id,
            } => self.accept_connection_request(app_name, transaction_id),

            OutstandingRequest::PublishRequested {
                stream_key,
                mode,
                stream_id,
            } => self.accept_publish_request(stream_id, stream_key, mode),

            OutstandingRequest::PlayRequested {
                stream_key,
                stream_id,
                reset,
            } => self.accept_play_request(stream_id, stream_key, reset),
        }
    }

    /// Tells the server session that it should reject an outstanding request.  The client is told
    /// why and the session stays usable.
    pub fn reject_request(
        &mut self,
        request_id: u32,
        rejection: RequestRejection,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let request = self
            .outstanding_requests
            .remove(&request_id)
            .ok_or(ServerSessionError::InvalidRequestId(request_id))?;

        let result = match request {
            OutstandingRequest::ConnectionRequest { transaction_id, .. } => {
                let description = match rejection {
                    RequestRejection::Unauthorized { reason } => reason,
                    _ => "Connection rejected".to_string(),
                };

                let status = create_status_object("error", "NetConnection.Connect.Rejected", &description);
                self.send_command("_error", transaction_id, Amf0Value::Null, vec![Amf0Value::Object(status)], 0)?
            }

            OutstandingRequest::PublishRequested { stream_id, .. } => {
                let (code, description) = rejection::publish_status(&rejection);
                self.send_status(stream_id, "error", code, &description)?
            }

            OutstandingRequest::PlayRequested { stream_id, .. } => {
                let (code, description) = rejection::play_status(&rejection);
                self.send_status(stream_id, "error", code, &description)?
            }
        };

        Ok(vec![result])
    }

    /// Tells a playing stream that its publisher went away.  The client receives an unpublish
    /// notification followed by a stream EOF, and the stream can be reused for another play.
    pub fn notify_stream_unpublished(
        &mut self,
        stream_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_key = match self.active_streams.get_mut(&stream_id) {
            Some(stream) => match stream.playing_key() {
                Some(key) => {
                    let key = key.to_string();
                    stream.current_state = StreamState::Created;
                    key
                }

                None => return Ok(Vec::new()),
            },

            None => return Ok(Vec::new()),
        };

        let description = format!("Stream {} was unpublished", stream_key);
        let status = self.send_status(stream_id, "status", "NetStream.Play.UnpublishNotify", &description)?;
        let eof = self.send_message(
            RtmpMessage::UserControl {
                event_type: UserControlEventType::StreamEof,
                stream_id: Some(stream_id),
                buffer_length: None,
                timestamp: None,
            },
            stream_id,
            false,
        )?;

        Ok(vec![status, eof])
    }

    fn handle_message(
        &mut self,
        payload: MessagePayload,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_id = payload.message_stream_id;
        let results = match payload.to_rtmp_message()? {
            RtmpMessage::Abort { stream_id: chunk_stream_id } => {
                self.deserializer.abort_message(chunk_stream_id);
                Vec::new()
            }

            RtmpMessage::Acknowledgement { sequence_number } => {
                vec![ServerSessionResult::RaisedEvent(ServerSessionEvent::AcknowledgementReceived {
                    bytes_received: sequence_number,
                })]
            }

            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                additional_arguments,
            } => self.handle_amf0_command(
                stream_id,
                command_name,
                transaction_id,
                command_object,
                additional_arguments,
            )?,

            RtmpMessage::Amf0Data { values } => self.handle_amf0_data(values, stream_id),

            RtmpMessage::AudioData { data } => self.handle_media(false, data, stream_id, payload.timestamp),

            RtmpMessage::VideoData { data } => self.handle_media(true, data, stream_id, payload.timestamp),

            RtmpMessage::SetChunkSize { size } => {
                self.deserializer.set_max_chunk_size(size)?;
                vec![ServerSessionResult::RaisedEvent(ServerSessionEvent::ClientChunkSizeChanged {
                    new_chunk_size: size,
                })]
            }

            RtmpMessage::UserControl {
                event_type,
                timestamp,
                ..
            } => self.handle_user_control(event_type, timestamp)?,

            RtmpMessage::WindowAcknowledgement { size } => {
                self.peer_window_ack_size = Some(size);
                Vec::new()
            }

            RtmpMessage::SetPeerBandwidth { .. } => Vec::new(),

            RtmpMessage::Unknown { .. } => {
                vec![ServerSessionResult::UnhandleableMessageReceived(payload)]
            }
        };

        Ok(results)
    }

    fn handle_amf0_command(
        &mut self,
        stream_id: u32,
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let handler = match commands::find_handler(&command_name) {
            Some(handler) => handler,
            None => {
                tracing::debug!(command = %command_name, "Received unhandled command");
                let event = ServerSessionEvent::UnhandleableAmf0Command {
                    command_name,
                    transaction_id,
                    command_object,
                    additional_values: arguments,
                };

                return Ok(vec![ServerSessionResult::RaisedEvent(event)]);
            }
        };

        let request = commands::CommandRequest {
            stream_id,
            transaction_id,
            command_object,
            arguments,
        };

        handler(self, request)
    }

    fn handle_amf0_data(&mut self, values: Vec<Amf0Value>, stream_id: u32) -> Vec<ServerSessionResult> {
        let mut values = values.into_iter();
        let mut first = values.next();
        if matches!(&first, Some(Amf0Value::Utf8String(name)) if name == "@setDataFrame") {
            first = values.next();
        }

        match first {
            Some(Amf0Value::Utf8String(ref name)) if name == "onMetaData" => (),
            _ => return Vec::new(),
        }

        let properties = match values.next().and_then(|value| value.into_properties()) {
            Some(properties) => properties,
            None => return Vec::new(),
        };

        let (app_name, stream_key) = match self.publishing_stream(stream_id) {
            Some(names) => names,
            None => return Vec::new(), // metadata has no meaning unless publishing
        };

        let event = ServerSessionEvent::StreamMetadataChanged {
            app_name,
            stream_key,
            stream_id,
            metadata: StreamMetadata::from_properties(&properties),
            properties,
        };

        vec![ServerSessionResult::RaisedEvent(event)]
    }

    fn handle_media(
        &self,
        is_video: bool,
        data: RentedBuffer,
        stream_id: u32,
        timestamp: RtmpTimestamp,
    ) -> Vec<ServerSessionResult> {
        // Media on anything but a publishing stream is ignored
        let (app_name, stream_key) = match self.publishing_stream(stream_id) {
            Some(names) => names,
            None => return Vec::new(),
        };

        let event = if is_video {
            ServerSessionEvent::VideoDataReceived {
                app_name,
                stream_key,
                stream_id,
                data,
                timestamp,
            }
        } else {
            ServerSessionEvent::AudioDataReceived {
                app_name,
                stream_key,
                stream_id,
                data,
                timestamp,
            }
        };

        vec![ServerSessionResult::RaisedEvent(event)]
    }

    fn handle_user_control(
        &mut self,
        event_type: UserControlEventType,
        timestamp: Option<RtmpTimestamp>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let results = match event_type {
            UserControlEventType::PingRequest => {
                let response = RtmpMessage::UserControl {
                    event_type: UserControlEventType::PingResponse,
                    stream_id: None,
                    buffer_length: None,
                    timestamp: Some(timestamp.unwrap_or_default()),
                };

                vec![self.send_message(response, 0, false)?]
            }

            UserControlEventType::PingResponse => {
                let event = ServerSessionEvent::PingResponseReceived {
                    timestamp: timestamp.unwrap_or_default(),
                };

                vec![ServerSessionResult::RaisedEvent(event)]
            }

            _ => Vec::new(),
        };

        Ok(results)
    }

    fn acknowledge_if_window_crossed(&mut self) -> Result<Option<ServerSessionResult>, ServerSessionError> {
        let window = match self.peer_window_ack_size {
            Some(window) if window > 0 => window as u64,
            _ => return Ok(None),
        };

        if self.bytes_received - self.bytes_received_at_last_ack < window {
            return Ok(None);
        }

        self.bytes_received_at_last_ack = self.bytes_received;
        let ack = RtmpMessage::Acknowledgement {
            // The sequence number wraps along with the 32 bit counter on the wire
            sequence_number: self.bytes_received as u32,
        };

        Ok(Some(self.send_message(ack, 0, false)?))
    }

    fn accept_connection_request(
        &mut self,
        app_name: String,
        transaction_id: f64,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let mut results = Vec::with_capacity(5);
        let window_ack = RtmpMessage::WindowAcknowledgement {
            size: self.config.window_ack_size,
        };

        results.push(self.send_message(window_ack, 0, true)?);

        let peer_bandwidth = RtmpMessage::SetPeerBandwidth {
            size: self.config.peer_bandwidth,
            limit_type: PeerBandwidthLimitType::Dynamic,
        };

        results.push(self.send_message(peer_bandwidth, 0, true)?);

        let chunk_size_packet = self
            .serializer
            .set_max_chunk_size(self.config.chunk_size, self.get_epoch())?;

        results.push(ServerSessionResult::OutboundResponse(chunk_size_packet));

        let stream_begin = RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamBegin,
            stream_id: Some(0),
            buffer_length: None,
            timestamp: None,
        };

        results.push(self.send_message(stream_begin, 0, true)?);

        let mut command_object = HashMap::new();
        command_object.insert(
            "fmsVer".to_string(),
            Amf0Value::Utf8String(self.config.fms_version.clone()),
        );
        command_object.insert("capabilities".to_string(), Amf0Value::Number(31.0));

        let description = format!("Successfully connected on app: {}", app_name);
        let mut status = create_status_object("status", "NetConnection.Connect.Success", &description);
        status.insert(
            "objectEncoding".to_string(),
            Amf0Value::Number(self.object_encoding),
        );

        results.push(self.send_command(
            "_result",
            transaction_id,
            Amf0Value::Object(command_object),
            vec![Amf0Value::Object(status)],
            0,
        )?);

        tracing::debug!(app = %app_name, "Connection accepted");
        self.connected_app_name = Some(app_name);
        Ok(results)
    }

    fn accept_publish_request(
        &mut self,
        stream_id: u32,
        stream_key: String,
        mode: PublishMode,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream = self
            .active_streams
            .get_mut(&stream_id)
            .ok_or(ServerSessionError::ActionAttemptedOnInactiveStream {
                action: "publish",
                stream_id,
            })?;

        let description = format!("Successfully started publishing on stream key {}", stream_key);
        stream.current_state = StreamState::Publishing { stream_key, mode };

        let stream_begin = RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamBegin,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        };

        Ok(vec![
            self.send_message(stream_begin, 0, false)?,
            self.send_status(stream_id, "status", "NetStream.Publish.Start", &description)?,
        ])
    }

    fn accept_play_request(
        &mut self,
        stream_id: u32,
        stream_key: String,
        reset: bool,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream = self
            .active_streams
            .get_mut(&stream_id)
            .ok_or(ServerSessionError::ActionAttemptedOnInactiveStream {
                action: "play",
                stream_id,
            })?;

        let description = format!("Successfully started playback on stream key {}", stream_key);
        stream.current_state = StreamState::Playing {
            stream_key,
            paused: false,
        };

        let mut results = Vec::with_capacity(5);
        let stream_begin = RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamBegin,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        };

        results.push(self.send_message(stream_begin, 0, false)?);

        if reset {
            results.push(self.send_status(stream_id, "status", "NetStream.Play.Reset", "Reset stream")?);
        }

        results.push(self.send_status(stream_id, "status", "NetStream.Play.Start", &description)?);

        let sample_access = RtmpMessage::Amf0Data {
            values: vec![
                Amf0Value::Utf8String("|RtmpSampleAccess".to_string()),
                Amf0Value::Boolean(false),
                Amf0Value::Boolean(false),
            ],
        };

        results.push(self.send_message(sample_access, stream_id, false)?);

        let mut data_start = HashMap::new();
        data_start.insert(
            "code".to_string(),
            Amf0Value::Utf8String("NetStream.Data.Start".to_string()),
        );

        let data_start = RtmpMessage::Amf0Data {
            values: vec![
                Amf0Value::Utf8String("onStatus".to_string()),
                Amf0Value::Object(data_start),
            ],
        };

        results.push(self.send_message(data_start, stream_id, false)?);
        Ok(results)
    }

    /// App name and stream key when `stream_id` is publishing on a connected session
    fn publishing_stream(&self, stream_id: u32) -> Option<(String, String)> {
        let app_name = self.connected_app_name.as_ref()?;
        let stream_key = self.active_streams.get(&stream_id)?.publishing_key()?;
        Some((app_name.clone(), stream_key.to_string()))
    }

    fn register_request(&mut self, request: OutstandingRequest) -> u32 {
        let request_number = self.next_request_number;
        self.next_request_number = self.next_request_number.wrapping_add(1);
        self.outstanding_requests.insert(request_number, request);
        request_number
    }

    fn send_message(
        &mut self,
        message: RtmpMessage,
        stream_id: u32,
        force_uncompressed: bool,
    ) -> Result<ServerSessionResult, ServerSessionError> {
        let payload = message.into_message_payload(self.get_epoch(), stream_id)?;
        let packet = self.serializer.serialize(&payload, force_uncompressed)?;
        Ok(ServerSessionResult::OutboundResponse(packet))
    }

    fn send_command(
        &mut self,
        command_name: &str,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
        stream_id: u32,
    ) -> Result<ServerSessionResult, ServerSessionError> {
        let message = RtmpMessage::Amf0Command {
            command_name: command_name.to_string(),
            transaction_id,
            command_object,
            additional_arguments,
        };

        self.send_message(message, stream_id, false)
    }

    fn send_status(
        &mut self,
        stream_id: u32,
        level: &str,
        code: &str,
        description: &str,
    ) -> Result<ServerSessionResult, ServerSessionError> {
        let status = create_status_object(level, code, description);
        self.send_command("onStatus", 0.0, Amf0Value::Null, vec![Amf0Value::Object(status)], stream_id)
    }

    fn get_epoch(&self) -> RtmpTimestamp {
        RtmpTimestamp::since(self.start_time)
    }
}

fn create_status_object(level: &str, code: &str, description: &str) -> HashMap<String, Amf0Value> {
    let mut properties = HashMap::new();
    properties.insert("level".to_string(), Amf0Value::Utf8String(level.to_string()));
    properties.insert("code".to_string(), Amf0Value::Utf8String(code.to_string()));
    properties.insert(
        "description".to_string(),
        Amf0Value::Utf8String(description.to_string()),
    );
    properties
}
