//! Runtime for the RTMP ingest server: accepts connections, routes published media to players
//! and keeps slow players from affecting anyone else.

pub mod auth;
pub mod bitrate;
pub mod config;
pub mod connection;
pub mod context;
pub mod fanout;
pub mod gop_cache;
pub mod listener;
pub mod media;
pub mod notifications;
pub mod registry;
pub mod stream_context;
pub mod stream_path;

use std::fmt::Display;
use std::future::Future;

/// Runs the future on its own task, logging the error it fails with
pub fn spawn<F, E>(future: F)
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    tokio::task::spawn(async {
        if let Err(error) = future.await {
            tracing::warn!(%error, "Task failed");
        }
    });
}
