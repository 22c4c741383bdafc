//! Process wide directory of who publishes and who plays each stream path.
//!
//! Publishers and subscribers live in two separately locked maps so that a flood of players
//! joining never holds up a publisher starting, and the other way around.  Neither lock is held
//! across I/O.  Only unpublishing holds both, and it always takes the publisher lock first.

use crate::stream_context::{PublishContext, SessionId, SubscribeContext};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Stream {0} already has a publisher")]
    AlreadyExists(String),

    #[error("Session {session_id} is already playing stream {path} on stream id {stream_id}")]
    AlreadySubscribing {
        path: String,
        session_id: SessionId,
        stream_id: u32,
    },

    #[error("Nothing is being published on stream {0}")]
    StreamNotReady(String),
}

#[derive(Default)]
pub struct StreamRegistry {
    publishers: Mutex<HashMap<String, Arc<PublishContext>>>,
    subscribers: Mutex<HashMap<String, Vec<Arc<SubscribeContext>>>>,
}

impl StreamRegistry {
    pub fn new() -> StreamRegistry {
        StreamRegistry::default()
    }

    /// Makes the context the one publisher of its path
    pub fn start_publishing(&self, context: Arc<PublishContext>) -> Result<(), RegistryError> {
        let path = context.path().as_str().to_string();
        let session_id = context.session_id();

        match self.publishers.lock().entry(path.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyExists(path)),
            Entry::Vacant(entry) => {
                entry.insert(context);
            }
        }

        tracing::info!(stream = %path, session = session_id, "Publisher registered");
        Ok(())
    }

    /// Removes the session's publisher from the path, returning the subscribers that were
    /// attached so they can be told.  Nothing changes if another session owns the path.
    pub fn stop_publishing(&self, path: &str, session_id: SessionId) -> Vec<Arc<SubscribeContext>> {
        // Subscribers are taken while the path is still held so a publisher and player arriving
        // on the same path right after can't have their subscription swept up with ours
        let mut publishers = self.publishers.lock();
        match publishers.get(path) {
            Some(publisher) if publisher.session_id() == session_id => (),
            Some(publisher) => {
                tracing::warn!(
                    stream = %path,
                    owner = publisher.session_id(),
                    session = session_id,
                    "Session tried to stop a stream it doesn't publish"
                );

                return Vec::new();
            }

            None => return Vec::new(),
        }

        let subscribers = self.subscribers.lock().remove(path).unwrap_or_default();
        publishers.remove(path);
        drop(publishers);

        tracing::info!(
            stream = %path,
            session = session_id,
            subscribers = subscribers.len(),
            "Publisher unregistered"
        );

        subscribers
    }

    /// Adds a player to the path and returns the publisher it should be primed from
    pub fn start_subscribing(
        &self,
        context: Arc<SubscribeContext>,
    ) -> Result<Arc<PublishContext>, RegistryError> {
        let path = context.path().as_str().to_string();
        let publisher = self
            .publisher(&path)
            .ok_or_else(|| RegistryError::StreamNotReady(path.clone()))?;

        {
            let mut subscribers = self.subscribers.lock();
            let entries = subscribers.entry(path.clone()).or_default();
            let already_subscribed = entries.iter().any(|x| {
                x.session_id() == context.session_id() && x.stream_id() == context.stream_id()
            });

            if already_subscribed {
                return Err(RegistryError::AlreadySubscribing {
                    path,
                    session_id: context.session_id(),
                    stream_id: context.stream_id(),
                });
            }

            entries.push(context.clone());
        }

        // The publisher may have left between the lookup and the insert.  If so its subscriber
        // snapshot might not contain this context, so back out instead of waiting forever.
        let still_published = self
            .publisher(&path)
            .map_or(false, |current| Arc::ptr_eq(&current, &publisher));

        if !still_published {
            self.stop_subscribing(&path, context.session_id(), context.stream_id());
            return Err(RegistryError::StreamNotReady(path));
        }

        tracing::info!(
            stream = %path,
            session = context.session_id(),
            stream_id = context.stream_id(),
            "Subscriber registered"
        );

        Ok(publisher)
    }

    /// Returns false if the subscriber was not registered
    pub fn stop_subscribing(&self, path: &str, session_id: SessionId, stream_id: u32) -> bool {
        let mut subscribers = self.subscribers.lock();
        let entries = match subscribers.get_mut(path) {
            Some(entries) => entries,
            None => return false,
        };

        let count = entries.len();
        entries.retain(|x| x.session_id() != session_id || x.stream_id() != stream_id);
        let removed = entries.len() != count;

        if entries.is_empty() {
            subscribers.remove(path);
        }

        if removed {
            tracing::info!(stream = %path, session = session_id, stream_id, "Subscriber unregistered");
        }

        removed
    }

    /// A point in time copy of the path's subscribers.  The lock is released before the caller
    /// iterates, so subscribers leaving mid broadcast can't invalidate it.
    pub fn subscribers_snapshot(&self, path: &str) -> Vec<Arc<SubscribeContext>> {
        self.subscribers
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether this exact subscriber context is still attached to its path
    pub fn is_subscribed(&self, context: &Arc<SubscribeContext>) -> bool {
        self.subscribers
            .lock()
            .get(context.path().as_str())
            .map_or(false, |entries| entries.iter().any(|x| Arc::ptr_eq(x, context)))
    }

    pub fn publisher(&self, path: &str) -> Option<Arc<PublishContext>> {
        self.publishers.lock().get(path).cloned()
    }

    pub fn publisher_count(&self) -> usize {
        self.publishers.lock().len()
    }
}
