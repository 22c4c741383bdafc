use crate::stream_context::{PublishContext, SubscribeContext};
use std::collections::HashMap;
use std::sync::Arc;

/// What a logical stream opened by `createStream` is currently used for
#[derive(Debug, Clone)]
pub enum StreamContext {
    Publishing(Arc<PublishContext>),
    Subscribing(Arc<SubscribeContext>),
}

/// The logical streams of one connection, keyed by stream id.  The connection is their only
/// owner; the registry just holds shared handles to the contexts inside.
#[derive(Debug, Default)]
pub struct StreamArena {
    streams: HashMap<u32, StreamContext>,
}

impl StreamArena {
    pub fn new() -> StreamArena {
        StreamArena::default()
    }

    pub fn get(&self, stream_id: u32) -> Option<&StreamContext> {
        self.streams.get(&stream_id)
    }

    pub fn insert(&mut self, stream_id: u32, context: StreamContext) {
        self.streams.insert(stream_id, context);
    }

    pub fn publishing(&self, stream_id: u32) -> Option<&Arc<PublishContext>> {
        match self.streams.get(&stream_id) {
            Some(StreamContext::Publishing(context)) => Some(context),
            _ => None,
        }
    }

    pub fn subscribing(&self, stream_id: u32) -> Option<&Arc<SubscribeContext>> {
        match self.streams.get(&stream_id) {
            Some(StreamContext::Subscribing(context)) => Some(context),
            _ => None,
        }
    }

    pub fn remove_publishing(&mut self, stream_id: u32) -> Option<Arc<PublishContext>> {
        match self.streams.remove(&stream_id) {
            Some(StreamContext::Publishing(context)) => Some(context),
            Some(other) => {
                self.streams.insert(stream_id, other);
                None
            }

            None => None,
        }
    }

    pub fn remove_subscribing(&mut self, stream_id: u32) -> Option<Arc<SubscribeContext>> {
        match self.streams.remove(&stream_id) {
            Some(StreamContext::Subscribing(context)) => Some(context),
            Some(other) => {
                self.streams.insert(stream_id, other);
                None
            }

            None => None,
        }
    }

    pub fn drain(&mut self) -> Vec<StreamContext> {
        self.streams.drain().map(|(_, context)| context).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{channel, DiscardThresholds};
    use crate::gop_cache::GopCache;
    use crate::stream_path::StreamPath;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn publishing() -> StreamContext {
        let path = StreamPath::parse("live", "abc");
        StreamContext::Publishing(Arc::new(PublishContext::new(1, 1, path, GopCache::new(10))))
    }

    fn subscribing() -> StreamContext {
        let (queue, _receiver) = channel(DiscardThresholds {
            max_bytes: 10,
            max_packets: 10,
        });

        let (signals, _signal_receiver) = mpsc::unbounded_channel();
        let path = StreamPath::parse("live", "abc");
        let context = SubscribeContext::new(1, 2, path, queue, signals, CancellationToken::new());
        StreamContext::Subscribing(Arc::new(context))
    }

    #[test]
    fn removing_with_the_wrong_role_keeps_the_stream() {
        let mut arena = StreamArena::new();
        arena.insert(1, publishing());
        arena.insert(2, subscribing());

        assert!(arena.remove_subscribing(1).is_none());
        assert!(arena.remove_publishing(2).is_none());
        assert_eq!(arena.len(), 2);

        assert!(arena.remove_publishing(1).is_some());
        assert!(arena.remove_subscribing(2).is_some());
        assert!(arena.is_empty());
    }

    #[test]
    fn role_lookups_only_match_their_role() {
        let mut arena = StreamArena::new();
        arena.insert(1, publishing());

        assert!(arena.publishing(1).is_some());
        assert!(arena.subscribing(1).is_none());
        assert!(arena.get(3).is_none());
    }
}
