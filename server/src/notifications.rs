//! Fans stream lifecycle events out to whatever collaborators were registered at startup
//! (recorders, relays, remuxers, ...).

use crate::stream_context::SessionId;
use ingest_rtmp::sessions::StreamMetadata;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ConnectionEstablished {
        session_id: SessionId,
        app_name: String,
    },

    /// Only raised for connections that got as far as an accepted `connect`
    ConnectionClosed {
        session_id: SessionId,
        app_name: String,
    },

    PublishStarted {
        session_id: SessionId,
        path: String,
    },

    Unpublished {
        session_id: SessionId,
        path: String,
    },

    Subscribed {
        session_id: SessionId,
        stream_id: u32,
        path: String,
    },

    Unsubscribed {
        session_id: SessionId,
        stream_id: u32,
        path: String,
    },

    MetadataReceived {
        session_id: SessionId,
        path: String,
        metadata: StreamMetadata,
    },
}

pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, event: &StreamEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Calls every handler in registration order.  A handler that fails or panics is logged and
/// skipped; the rest still see the event.
#[derive(Default)]
pub struct Notifier {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    /// A notifier that starts with a [`LoggingEventHandler`]
    pub fn with_logging() -> Notifier {
        Notifier::new().with_handler(LoggingEventHandler)
    }

    pub fn with_handler<H: EventHandler + 'static>(mut self, handler: H) -> Notifier {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn notify(&self, event: &StreamEvent) {
        for handler in &self.handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => (),
                Ok(Err(error)) => {
                    tracing::warn!(handler = handler.name(), %error, "Event handler failed");
                }

                Err(_) => {
                    tracing::warn!(handler = handler.name(), ?event, "Event handler panicked");
                }
            }
        }
    }
}

pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(&self, event: &StreamEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        match event {
            StreamEvent::ConnectionEstablished { session_id, app_name } => {
                tracing::info!(session = session_id, app = %app_name, "Client connected");
            }

            StreamEvent::ConnectionClosed { session_id, app_name } => {
                tracing::info!(session = session_id, app = %app_name, "Client left");
            }

            StreamEvent::PublishStarted { session_id, path } => {
                tracing::info!(session = session_id, stream = %path, "Publish started");
            }

            StreamEvent::Unpublished { session_id, path } => {
                tracing::info!(session = session_id, stream = %path, "Unpublished");
            }

            StreamEvent::Subscribed {
                session_id,
                stream_id,
                path,
            } => {
                tracing::info!(session = session_id, stream_id, stream = %path, "Playback started");
            }

            StreamEvent::Unsubscribed {
                session_id,
                stream_id,
                path,
            } => {
                tracing::info!(session = session_id, stream_id, stream = %path, "Playback stopped");
            }

            StreamEvent::MetadataReceived {
                session_id,
                path,
                metadata,
            } => {
                tracing::debug!(session = session_id, stream = %path, ?metadata, "Metadata received");
            }
        }

        Ok(())
    }
}
