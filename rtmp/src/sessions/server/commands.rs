//! Handlers for the AMF0 commands a server session understands.
//!
//! Commands are looked up by name in a static table; anything not in the table is raised to the
//! application as an `UnhandleableAmf0Command` event.

use super::active_stream::{ActiveStream, StreamState};
use super::outstanding_requests::OutstandingRequest;
use super::{
    create_status_object, PlayStartValue, PublishMode, ServerSession, ServerSessionError,
    ServerSessionEvent, ServerSessionResult,
};
use ingest_amf0::Amf0Value;

/// A command as received from the client
pub(super) struct CommandRequest {
    pub stream_id: u32,
    pub transaction_id: f64,
    pub command_object: Amf0Value,
    pub arguments: Vec<Amf0Value>,
}

type CommandHandler =
    fn(&mut ServerSession, CommandRequest) -> Result<Vec<ServerSessionResult>, ServerSessionError>;

static COMMAND_HANDLERS: &[(&str, CommandHandler)] = &[
    ("connect", ServerSession::handle_command_connect),
    ("createStream", ServerSession::handle_command_create_stream),
    ("publish", ServerSession::handle_command_publish),
    ("play", ServerSession::handle_command_play),
    ("pause", ServerSession::handle_command_pause),
    ("closeStream", ServerSession::handle_command_close_stream),
    ("deleteStream", ServerSession::handle_command_delete_stream),
    ("receiveAudio", ServerSession::handle_command_receive_audio),
    ("receiveVideo", ServerSession::handle_command_receive_video),
    ("FCPublish", ServerSession::handle_command_fc_publish),
    ("FCUnpublish", ServerSession::handle_command_fc_unpublish),
];

pub(super) fn find_handler(command_name: &str) -> Option<CommandHandler> {
    COMMAND_HANDLERS
        .iter()
        .find(|(name, _)| *name == command_name)
        .map(|(_, handler)| *handler)
}

impl ServerSession {
    fn handle_command_connect(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let pending_connect = self
            .outstanding_requests
            .values()
            .any(|request| matches!(request, OutstandingRequest::ConnectionRequest { .. }));

        if self.connected_app_name.is_some() || pending_connect {
            return Err(ServerSessionError::ConnectionAlreadyEstablished);
        }

        let properties = request.command_object.into_properties().unwrap_or_default();
        let app_name = properties
            .get("app")
            .and_then(|value| value.as_str())
            .map(|name| name.trim_end_matches('/').to_string())
            .unwrap_or_default();

        if app_name.is_empty() {
            let status = create_status_object(
                "error",
                "NetConnection.Connect.Rejected",
                "No application name was provided",
            );

            let result = self.send_command(
                "_error",
                request.transaction_id,
                Amf0Value::Null,
                vec![Amf0Value::Object(status)],
                0,
            )?;

            return Ok(vec![result]);
        }

        self.object_encoding = properties
            .get("objectEncoding")
            .and_then(|value| value.as_number())
            .unwrap_or(0.0);

        let request_id = self.register_request(OutstandingRequest::ConnectionRequest {
            app_name: app_name.clone(),
            transaction_id: request.transaction_id,
        });

        let event = ServerSessionEvent::ConnectionRequested {
            request_id,
            app_name,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_create_stream(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let new_stream_id = self.next_stream_id;
        self.next_stream_id = match new_stream_id.checked_add(1) {
            Some(next) => next,
            None => {
                let status = create_status_object("error", "NetConnection.Call.Failed", "No stream ids left");
                let result = self.send_command(
                    "_error",
                    request.transaction_id,
                    Amf0Value::Null,
                    vec![Amf0Value::Object(status)],
                    request.stream_id,
                )?;

                return Ok(vec![result]);
            }
        };

        self.active_streams.insert(
            new_stream_id,
            ActiveStream {
                current_state: StreamState::Created,
            },
        );

        let result = self.send_command(
            "_result",
            request.transaction_id,
            Amf0Value::Null,
            vec![Amf0Value::Number(new_stream_id as f64)],
            request.stream_id,
        )?;

        Ok(vec![result])
    }

    fn handle_command_publish(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_id = request.stream_id;
        let app_name = match &self.connected_app_name {
            Some(name) if self.active_streams.contains_key(&stream_id) => name.clone(),
            _ => {
                let result = self.send_status(
                    stream_id,
                    "error",
                    "NetStream.Publish.BadConnection",
                    "Publishing requires a connection and a created stream",
                )?;

                return Ok(vec![result]);
            }
        };

        let mut arguments = request.arguments.into_iter();
        let stream_key = match arguments.next().and_then(|value| value.into_string()) {
            Some(key) if !key.is_empty() => key,
            _ => {
                let result = self.send_status(
                    stream_id,
                    "error",
                    "NetStream.Publish.BadName",
                    "No stream key was provided",
                )?;

                return Ok(vec![result]);
            }
        };

        let mode = match arguments.next() {
            Some(Amf0Value::Utf8String(name)) => PublishMode::from_name(&name),
            _ => Some(PublishMode::Live),
        };

        let mode = match mode {
            Some(mode) => mode,
            None => {
                let result = self.send_status(
                    stream_id,
                    "error",
                    "NetStream.Publish.BadName",
                    "Invalid publish type",
                )?;

                return Ok(vec![result]);
            }
        };

        let request_id = self.register_request(OutstandingRequest::PublishRequested {
            stream_key: stream_key.clone(),
            mode,
            stream_id,
        });

        let event = ServerSessionEvent::PublishStreamRequested {
            request_id,
            app_name,
            stream_key,
            mode,
            stream_id,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_play(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_id = request.stream_id;
        let app_name = match &self.connected_app_name {
            Some(name) if self.active_streams.contains_key(&stream_id) => name.clone(),
            _ => {
                let result = self.send_status(
                    stream_id,
                    "error",
                    "NetStream.Play.BadConnection",
                    "Playback requires a connection and a created stream",
                )?;

                return Ok(vec![result]);
            }
        };

        let mut arguments = request.arguments.into_iter();
        let stream_key = match arguments.next().and_then(|value| value.into_string()) {
            Some(key) if !key.is_empty() => key,
            _ => {
                let result = self.send_status(
                    stream_id,
                    "error",
                    "NetStream.Play.StreamNotFound",
                    "No stream key was provided",
                )?;

                return Ok(vec![result]);
            }
        };

        let start_at = match arguments.next().and_then(|value| value.as_number()) {
            Some(start) if start >= 0.0 => PlayStartValue::StartTimeInSeconds(start as u32),
            Some(start) if start == -1.0 => PlayStartValue::LiveOnly,
            _ => PlayStartValue::LiveOrRecorded,
        };

        let duration = match arguments.next().and_then(|value| value.as_number()) {
            Some(duration) if duration >= 0.0 => Some(duration as u32),
            _ => None,
        };

        let reset = match arguments.next() {
            Some(Amf0Value::Boolean(reset)) => reset,
            Some(Amf0Value::Number(reset)) => reset != 0.0,
            _ => false,
        };

        let request_id = self.register_request(OutstandingRequest::PlayRequested {
            stream_key: stream_key.clone(),
            stream_id,
            reset,
        });

        let event = ServerSessionEvent::PlayStreamRequested {
            request_id,
            app_name,
            stream_key,
            start_at,
            duration,
            reset,
            stream_id,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_pause(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let pause = match request.arguments.first() {
            Some(Amf0Value::Boolean(pause)) => *pause,
            _ => return Ok(Vec::new()),
        };

        let stream_id = request.stream_id;
        let stream_key = match self.active_streams.get_mut(&stream_id) {
            Some(ActiveStream {
                current_state: StreamState::Playing { stream_key, paused },
            }) => {
                *paused = pause;
                stream_key.clone()
            }

            _ => return Ok(Vec::new()),
        };

        let (code, description) = if pause {
            ("NetStream.Pause.Notify", "Paused live")
        } else {
            ("NetStream.Unpause.Notify", "Unpaused live")
        };

        let status = self.send_status(stream_id, "status", code, description)?;
        let event = ServerSessionEvent::PlayStreamPauseChanged {
            stream_key,
            stream_id,
            paused: pause,
        };

        Ok(vec![status, ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_close_stream(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_id = request
            .arguments
            .first()
            .and_then(|value| value.as_number())
            .map(|id| id as u32)
            .unwrap_or(request.stream_id);

        self.close_stream(stream_id, false)
    }

    fn handle_command_delete_stream(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        match request.arguments.first().and_then(|value| value.as_number()) {
            Some(stream_id) => self.close_stream(stream_id as u32, true),
            None => Ok(Vec::new()),
        }
    }

    fn handle_command_receive_audio(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let enabled = first_flag(&request.arguments);
        let stream_id = request.stream_id;
        let results = match self.playing_stream_key(stream_id) {
            Some(stream_key) => vec![ServerSessionResult::RaisedEvent(
                ServerSessionEvent::ReceiveAudioChanged {
                    stream_key,
                    stream_id,
                    enabled,
                },
            )],

            None => Vec::new(),
        };

        Ok(results)
    }

    fn handle_command_receive_video(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let enabled = first_flag(&request.arguments);
        let stream_id = request.stream_id;
        let results = match self.playing_stream_key(stream_id) {
            Some(stream_key) => vec![ServerSessionResult::RaisedEvent(
                ServerSessionEvent::ReceiveVideoChanged {
                    stream_key,
                    stream_id,
                    enabled,
                },
            )],

            None => Vec::new(),
        };

        Ok(results)
    }

    fn handle_command_fc_publish(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_key = request
            .arguments
            .iter()
            .find_map(|value| value.as_str())
            .unwrap_or_default();

        let description = format!("FCPublish to stream {}", stream_key);
        let status = create_status_object("status", "NetStream.Publish.Start", &description);
        let result = self.send_command(
            "onFCPublish",
            0.0,
            Amf0Value::Null,
            vec![Amf0Value::Object(status)],
            request.stream_id,
        )?;

        Ok(vec![result])
    }

    fn handle_command_fc_unpublish(
        &mut self,
        request: CommandRequest,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_key = request
            .arguments
            .iter()
            .find_map(|value| value.as_str())
            .unwrap_or_default();

        let description = format!("FCUnpublish from stream {}", stream_key);
        let status = create_status_object("status", "NetStream.Unpublish.Success", &description);
        let result = self.send_command(
            "onFCUnpublish",
            0.0,
            Amf0Value::Null,
            vec![Amf0Value::Object(status)],
            request.stream_id,
        )?;

        Ok(vec![result])
    }

    /// Ends whatever the stream was doing.  Deleted streams are forgotten, closed streams can be
    /// reused for another publish or play.
    fn close_stream(
        &mut self,
        stream_id: u32,
        remove: bool,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let previous_state = if remove {
            match self.active_streams.remove(&stream_id) {
                Some(stream) => stream.current_state,
                None => return Ok(Vec::new()),
            }
        } else {
            match self.active_streams.get_mut(&stream_id) {
                Some(stream) => std::mem::replace(&mut stream.current_state, StreamState::Created),
                None => return Ok(Vec::new()),
            }
        };

        let app_name = self.connected_app_name.clone().unwrap_or_default();
        let results = match previous_state {
            StreamState::Created => Vec::new(),

            StreamState::Publishing { stream_key, .. } => {
                let description = format!("Stream {} is now unpublished", stream_key);
                let status = self.send_status(
                    stream_id,
                    "status",
                    "NetStream.Unpublish.Success",
                    &description,
                )?;

                let event = ServerSessionEvent::PublishStreamFinished {
                    app_name,
                    stream_key,
                    stream_id,
                };

                vec![status, ServerSessionResult::RaisedEvent(event)]
            }

            StreamState::Playing { stream_key, .. } => {
                let event = ServerSessionEvent::PlayStreamFinished {
                    app_name,
                    stream_key,
                    stream_id,
                };

                vec![ServerSessionResult::RaisedEvent(event)]
            }
        };

        Ok(results)
    }

    fn playing_stream_key(&self, stream_id: u32) -> Option<String> {
        self.active_streams
            .get(&stream_id)?
            .playing_key()
            .map(|key| key.to_string())
    }
}

/// The boolean flag `receiveAudio` and `receiveVideo` carry, defaulting to enabled
fn first_flag(arguments: &[Amf0Value]) -> bool {
    arguments
        .iter()
        .find_map(|value| value.as_boolean())
        .unwrap_or(true)
}
