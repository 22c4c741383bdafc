//! One task per client connection.
//!
//! The connection owns its [`ServerSession`] and the logical streams opened on it.  Bytes from
//! the socket are fed to the session on this task only; everything bound for the socket goes
//! through a single writer task so session responses and subscriber media never interleave
//! mid chunk.

mod errors;
mod io;
mod state;

pub use self::errors::ConnectionError;
pub use self::state::{StreamArena, StreamContext};

use self::io::{connection_writer, perform_handshake};
use crate::auth::{AuthDecision, AuthRequest, RequestKind};
use crate::bitrate::BandwidthLimiter;
use crate::context::ServerContext;
use crate::fanout::{self, FanoutWorker};
use crate::media::MediaPacket;
use crate::notifications::StreamEvent;
use crate::registry::RegistryError;
use crate::spawn;
use crate::stream_context::{PublishContext, SessionId, SubscribeContext, SubscriberSignal};
use crate::stream_path::StreamPath;
use bytes::BytesMut;
use ingest_rtmp::chunk_io::Packet;
use ingest_rtmp::sessions::{
    RequestRejection, ServerSession, ServerSessionError, ServerSessionEvent, ServerSessionResult,
};
use ingest_rtmp::time::RtmpTimestamp;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const READ_BUFFER_SIZE: usize = 4096;

pub struct Connection {
    id: SessionId,
    context: Arc<ServerContext>,
    cancellation: CancellationToken,
}

impl Connection {
    pub fn new(id: SessionId, context: Arc<ServerContext>) -> Connection {
        let cancellation = context.shutdown.child_token();
        Connection {
            id,
            context,
            cancellation,
        }
    }

    /// Drives the connection until the client leaves, the server shuts down or the connection
    /// fails.  Every stream the connection published or played is torn down before returning.
    pub async fn run<S>(self, mut stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let timeout = self.context.config.handshake_timeout();
        let handshake = tokio::select! {
            _ = self.cancellation.cancelled() => return Ok(()),
            result = tokio::time::timeout(timeout, perform_handshake(&mut stream)) => {
                result.map_err(|_| ConnectionError::HandshakeTimeout(timeout))?
            }
        };

        let received_bytes = match handshake? {
            Some(bytes) => bytes,
            None => {
                tracing::debug!(session = self.id, "Client disconnected during handshake");
                return Ok(());
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (packet_sender, packet_receiver) = mpsc::channel(self.context.config.writer_queue_depth);
        spawn(connection_writer(self.id, writer, packet_receiver));

        let mut connection = ActiveConnection::new(self, packet_sender);
        let result = connection.run(reader, received_bytes).await;
        connection.close();

        match result {
            Err(ConnectionError::Session(ServerSessionError::ConnectionAlreadyEstablished)) => {
                tracing::debug!(session = connection.id, "Second connect command, closing silently");
                Ok(())
            }

            other => other,
        }
    }
}

/// A connection past its handshake
struct ActiveConnection {
    id: SessionId,
    context: Arc<ServerContext>,
    session: ServerSession,
    streams: StreamArena,
    writer: mpsc::Sender<Packet>,
    signal_sender: mpsc::UnboundedSender<SubscriberSignal>,
    signal_receiver: mpsc::UnboundedReceiver<SubscriberSignal>,
    limiter: Option<BandwidthLimiter>,
    cancellation: CancellationToken,

    /// Set once the client's `connect` was accepted
    app_name: Option<String>,
}

impl ActiveConnection {
    fn new(connection: Connection, writer: mpsc::Sender<Packet>) -> ActiveConnection {
        let config = &connection.context.config;
        let session = ServerSession::with_buffer_pool(
            config.session_config(),
            connection.context.buffer_pool.clone(),
        );

        let limiter = config
            .max_ingress_bytes_per_sec
            .map(|limit| BandwidthLimiter::new(limit, config.bitrate_window()));

        let (signal_sender, signal_receiver) = mpsc::unbounded_channel();

        ActiveConnection {
            id: connection.id,
            context: connection.context,
            session,
            streams: StreamArena::new(),
            writer,
            signal_sender,
            signal_receiver,
            limiter,
            cancellation: connection.cancellation,
            app_name: None,
        }
    }

    async fn run<R>(&mut self, mut reader: R, received_bytes: Vec<u8>) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        self.handle_input(&received_bytes).await?;

        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            tokio::select! {
                biased;

                _ = self.cancellation.cancelled() => {
                    tracing::debug!(session = self.id, "Connection cancelled");
                    break;
                }

                Some(signal) = self.signal_receiver.recv() => self.handle_signal(signal).await?,

                bytes_read = reader.read_buf(&mut buffer) => {
                    if bytes_read? == 0 {
                        tracing::info!(session = self.id, "Client disconnected");
                        break;
                    }

                    self.handle_input(&buffer).await?;
                    buffer.clear();
                }
            }
        }

        Ok(())
    }

    async fn handle_input(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if bytes.is_empty() {
            return Ok(());
        }

        if let Some(limiter) = self.limiter.as_mut() {
            limiter.record(bytes.len())?;
        }

        let results = self.session.handle_input(bytes)?;
        self.handle_session_results(results).await
    }

    async fn handle_session_results(&mut self, results: Vec<ServerSessionResult>) -> Result<(), ConnectionError> {
        for result in results {
            match result {
                ServerSessionResult::OutboundResponse(packet) => self.send(packet).await?,
                ServerSessionResult::RaisedEvent(event) => self.handle_raised_event(event).await?,
                ServerSessionResult::UnhandleableMessageReceived(payload) => {
                    tracing::debug!(
                        session = self.id,
                        type_id = payload.type_id,
                        stream_id = payload.message_stream_id,
                        "Unhandleable message received"
                    );
                }
            }
        }

        Ok(())
    }

    async fn handle_raised_event(&mut self, event: ServerSessionEvent) -> Result<(), ConnectionError> {
        match event {
            ServerSessionEvent::ConnectionRequested { request_id, app_name } => {
                tracing::info!(session = self.id, app = %app_name, "Client requested connection");
                let results = self.session.accept_request(request_id)?;
                self.send_outbound(results).await?;

                self.context.notifier.notify(&StreamEvent::ConnectionEstablished {
                    session_id: self.id,
                    app_name: app_name.clone(),
                });

                self.app_name = Some(app_name);
            }

            ServerSessionEvent::PublishStreamRequested {
                request_id,
                app_name,
                stream_key,
                mode,
                stream_id,
            } => {
                tracing::info!(
                    session = self.id,
                    app = %app_name,
                    stream_key = %stream_key,
                    ?mode,
                    stream_id,
                    "Client requested publishing"
                );

                self.handle_publish_request(request_id, &app_name, &stream_key, stream_id).await?;
            }

            ServerSessionEvent::PlayStreamRequested {
                request_id,
                app_name,
                stream_key,
                stream_id,
                ..
            } => {
                tracing::info!(
                    session = self.id,
                    app = %app_name,
                    stream_key = %stream_key,
                    stream_id,
                    "Client requested playback"
                );

                self.handle_play_request(request_id, &app_name, &stream_key, stream_id).await?;
            }

            ServerSessionEvent::PublishStreamFinished { stream_id, .. } => {
                if let Some(publisher) = self.streams.remove_publishing(stream_id) {
                    self.unpublish(&publisher);
                }
            }

            ServerSessionEvent::PlayStreamFinished { stream_id, .. } => {
                if let Some(subscriber) = self.streams.remove_subscribing(stream_id) {
                    self.unsubscribe(&subscriber);
                }
            }

            ServerSessionEvent::StreamMetadataChanged {
                stream_id,
                metadata,
                properties,
                ..
            } => {
                if let Some(publisher) = self.streams.publishing(stream_id) {
                    let packet = MediaPacket::metadata(RtmpTimestamp::new(0), properties)?;
                    self.ingest(publisher, packet);
                    self.context.notifier.notify(&StreamEvent::MetadataReceived {
                        session_id: self.id,
                        path: publisher.path().to_string(),
                        metadata,
                    });
                }
            }

            ServerSessionEvent::AudioDataReceived {
                stream_id,
                data,
                timestamp,
                ..
            } => {
                if let Some(publisher) = self.streams.publishing(stream_id) {
                    self.ingest(publisher, MediaPacket::audio(timestamp, data));
                }
            }

            ServerSessionEvent::VideoDataReceived {
                stream_id,
                data,
                timestamp,
                ..
            } => {
                if let Some(publisher) = self.streams.publishing(stream_id) {
                    self.ingest(publisher, MediaPacket::video(timestamp, data));
                }
            }

            ServerSessionEvent::PlayStreamPauseChanged { stream_id, paused, .. } => {
                if let Some(subscriber) = self.streams.subscribing(stream_id) {
                    if paused {
                        subscriber.pause();
                    } else {
                        match self.context.registry.publisher(subscriber.path().as_str()) {
                            Some(publisher) => publisher.prime(subscriber),
                            None => subscriber.resume(),
                        }
                    }
                }
            }

            ServerSessionEvent::ReceiveAudioChanged { stream_id, enabled, .. } => {
                if let Some(subscriber) = self.streams.subscribing(stream_id) {
                    subscriber.set_receive_audio(enabled);
                }
            }

            ServerSessionEvent::ReceiveVideoChanged { stream_id, enabled, .. } => {
                if let Some(subscriber) = self.streams.subscribing(stream_id) {
                    subscriber.set_receive_video(enabled);
                }
            }

            ServerSessionEvent::ClientChunkSizeChanged { new_chunk_size } => {
                tracing::debug!(session = self.id, new_chunk_size, "Client changed its chunk size");
            }

            ServerSessionEvent::AcknowledgementReceived { bytes_received } => {
                tracing::trace!(session = self.id, bytes_received, "Acknowledgement received");
            }

            ServerSessionEvent::PingResponseReceived { timestamp } => {
                tracing::trace!(session = self.id, timestamp = timestamp.value, "Ping response received");
            }

            ServerSessionEvent::UnhandleableAmf0Command { command_name, .. } => {
                tracing::debug!(session = self.id, command = %command_name, "Ignoring unhandled command");
            }
        }

        Ok(())
    }

    async fn handle_publish_request(
        &mut self,
        request_id: u32,
        app_name: &str,
        stream_key: &str,
        stream_id: u32,
    ) -> Result<(), ConnectionError> {
        if let Some(rejection) = self.stream_in_use(stream_id) {
            return self.reject(request_id, rejection).await;
        }

        let path = match self.authorize(app_name, stream_key, RequestKind::Publish) {
            Ok(path) => path,
            Err(reason) => {
                tracing::info!(session = self.id, %reason, "Publish denied");
                return self.reject(request_id, RequestRejection::Unauthorized { reason }).await;
            }
        };

        let publisher = Arc::new(PublishContext::new(
            self.id,
            stream_id,
            path,
            self.context.new_gop_cache(),
        ));

        if let Err(error) = self.context.registry.start_publishing(publisher.clone()) {
            tracing::info!(session = self.id, %error, "Publish rejected");
            return self.reject(request_id, registry_rejection(&error)).await;
        }

        self.streams.insert(stream_id, StreamContext::Publishing(publisher.clone()));
        let results = self.session.accept_request(request_id)?;
        self.send_outbound(results).await?;

        self.context.notifier.notify(&StreamEvent::PublishStarted {
            session_id: self.id,
            path: publisher.path().to_string(),
        });

        Ok(())
    }

    async fn handle_play_request(
        &mut self,
        request_id: u32,
        app_name: &str,
        stream_key: &str,
        stream_id: u32,
    ) -> Result<(), ConnectionError> {
        if let Some(rejection) = self.stream_in_use(stream_id) {
            return self.reject(request_id, rejection).await;
        }

        let path = match self.authorize(app_name, stream_key, RequestKind::Play) {
            Ok(path) => path,
            Err(reason) => {
                tracing::info!(session = self.id, %reason, "Playback denied");
                return self.reject(request_id, RequestRejection::Unauthorized { reason }).await;
            }
        };

        let (queue, receiver) = fanout::channel(self.context.config.discard_thresholds());
        let subscriber = Arc::new(SubscribeContext::new(
            self.id,
            stream_id,
            path,
            queue,
            self.signal_sender.clone(),
            self.cancellation.child_token(),
        ));

        let publisher = match self.context.registry.start_subscribing(subscriber.clone()) {
            Ok(publisher) => publisher,
            Err(error) => {
                tracing::info!(session = self.id, %error, "Playback rejected");
                return self.reject(request_id, registry_rejection(&error)).await;
            }
        };

        self.streams.insert(stream_id, StreamContext::Subscribing(subscriber.clone()));

        // Play.Start and friends must be queued for the socket before the first cached tag
        let results = self.session.accept_request(request_id)?;
        self.send_outbound(results).await?;

        let worker = FanoutWorker::new(
            receiver,
            self.session.outbound_chunk_size(),
            stream_id,
            self.writer.clone(),
            subscriber.cancellation().clone(),
        )?;

        spawn(worker.run());
        publisher.prime(&subscriber);

        self.context.notifier.notify(&StreamEvent::Subscribed {
            session_id: self.id,
            stream_id,
            path: subscriber.path().to_string(),
        });

        Ok(())
    }

    async fn handle_signal(&mut self, signal: SubscriberSignal) -> Result<(), ConnectionError> {
        match signal {
            SubscriberSignal::PublisherGone { stream_id } => {
                let subscriber = match self.streams.subscribing(stream_id) {
                    Some(subscriber) => subscriber.clone(),
                    None => return Ok(()),
                };

                // The stream id was reused for a newer subscription since the signal was sent
                if self.context.registry.is_subscribed(&subscriber) {
                    return Ok(());
                }

                self.streams.remove_subscribing(stream_id);
                self.unsubscribe(&subscriber);

                let results = self.session.notify_stream_unpublished(stream_id)?;
                self.send_outbound(results).await?;
            }
        }

        Ok(())
    }

    fn stream_in_use(&self, stream_id: u32) -> Option<RequestRejection> {
        match self.streams.get(stream_id) {
            Some(StreamContext::Publishing(_)) => Some(RequestRejection::AlreadyPublishing),
            Some(StreamContext::Subscribing(_)) => Some(RequestRejection::AlreadySubscribing),
            None => None,
        }
    }

    /// Returns the path the request should use, or why it was denied
    fn authorize(&self, app_name: &str, stream_key: &str, kind: RequestKind) -> Result<StreamPath, String> {
        let path = StreamPath::parse(app_name, stream_key);
        let request = AuthRequest {
            session_id: self.id,
            app_name,
            path: &path,
            kind,
        };

        match self.context.authorizer.authorize(&request) {
            AuthDecision::Allow { path_override } => Ok(path_override.unwrap_or(path)),
            AuthDecision::Deny { reason } => Err(reason),
        }
    }

    fn ingest(&self, publisher: &PublishContext, packet: MediaPacket) {
        let subscribers = self.context.registry.subscribers_snapshot(publisher.path().as_str());
        publisher.ingest(packet, &subscribers);
    }

    fn unpublish(&self, publisher: &PublishContext) {
        let subscribers = self
            .context
            .registry
            .stop_publishing(publisher.path().as_str(), self.id);

        for subscriber in &subscribers {
            if !subscriber.notify_publisher_gone() {
                // Its connection is already closing and will clean up on its own
                subscriber.cancel();
            }
        }

        publisher.clear();
        self.context.notifier.notify(&StreamEvent::Unpublished {
            session_id: self.id,
            path: publisher.path().to_string(),
        });
    }

    fn unsubscribe(&self, subscriber: &SubscribeContext) {
        self.context.registry.stop_subscribing(
            subscriber.path().as_str(),
            self.id,
            subscriber.stream_id(),
        );

        subscriber.cancel();
        self.context.notifier.notify(&StreamEvent::Unsubscribed {
            session_id: self.id,
            stream_id: subscriber.stream_id(),
            path: subscriber.path().to_string(),
        });
    }

    async fn reject(&mut self, request_id: u32, rejection: RequestRejection) -> Result<(), ConnectionError> {
        let results = self.session.reject_request(request_id, rejection)?;
        self.send_outbound(results).await
    }

    /// Sends the packets of an accept or reject.  Those never raise events.
    async fn send_outbound(&self, results: Vec<ServerSessionResult>) -> Result<(), ConnectionError> {
        for result in results {
            if let ServerSessionResult::OutboundResponse(packet) = result {
                self.send(packet).await?;
            }
        }

        Ok(())
    }

    async fn send(&self, packet: Packet) -> Result<(), ConnectionError> {
        self.writer
            .send(packet)
            .await
            .map_err(|_| ConnectionError::WriterClosed)
    }

    /// Tears down every stream still open on the connection
    fn close(&mut self) {
        for context in self.streams.drain() {
            match context {
                StreamContext::Publishing(publisher) => self.unpublish(&publisher),
                StreamContext::Subscribing(subscriber) => self.unsubscribe(&subscriber),
            }
        }

        self.cancellation.cancel();
        if let Some(app_name) = self.app_name.take() {
            self.context.notifier.notify(&StreamEvent::ConnectionClosed {
                session_id: self.id,
                app_name,
            });
        }

        tracing::info!(session = self.id, "Connection closed");
    }
}

/// The reply a client gets when the registry turns its request down
fn registry_rejection(error: &RegistryError) -> RequestRejection {
    match error {
        RegistryError::AlreadyExists(_) => RequestRejection::AlreadyExists,
        RegistryError::AlreadySubscribing { .. } => RequestRejection::AlreadySubscribing,
        RegistryError::StreamNotReady(_) => RequestRejection::StreamNotReady,
    }
}
