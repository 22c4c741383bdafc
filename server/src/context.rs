use crate::auth::{AllowAll, Authorizer, PublishKeyAuthorizer};
use crate::config::ServerConfig;
use crate::gop_cache::GopCache;
use crate::notifications::Notifier;
use crate::registry::StreamRegistry;
use crate::stream_context::SessionId;
use ingest_rtmp::buffers::BufferPool;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// State shared by every connection of a running server
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: StreamRegistry,
    pub authorizer: Box<dyn Authorizer>,
    pub notifier: Notifier,
    pub buffer_pool: BufferPool,

    /// Cancelling this tears down every connection and subscriber worker
    pub shutdown: CancellationToken,
    next_session_id: AtomicU64,
}

impl ServerContext {
    /// Builds the context with the collaborators the configuration asks for
    pub fn new(config: ServerConfig) -> ServerContext {
        let authorizer: Box<dyn Authorizer> = if config.publish_keys.is_empty() {
            Box::new(AllowAll)
        } else {
            Box::new(PublishKeyAuthorizer::new(config.publish_keys.clone()))
        };

        ServerContext::with_collaborators(config, authorizer, Notifier::with_logging())
    }

    pub fn with_collaborators(
        config: ServerConfig,
        authorizer: Box<dyn Authorizer>,
        notifier: Notifier,
    ) -> ServerContext {
        let buffer_pool = BufferPool::new(config.buffer_pool_max_buffers, config.buffer_pool_max_buffer_size);

        ServerContext {
            config,
            registry: StreamRegistry::new(),
            authorizer,
            notifier,
            buffer_pool,
            shutdown: CancellationToken::new(),
            next_session_id: AtomicU64::new(0),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new_gop_cache(&self) -> GopCache {
        if self.config.gop_cache_enabled {
            GopCache::new(self.config.gop_cache_max_tags)
        } else {
            GopCache::disabled()
        }
    }
}
