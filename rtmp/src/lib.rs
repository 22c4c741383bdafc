//! Sans-IO protocol core for an RTMP ingest and distribution server.
//!
//! Nothing in this crate touches a socket.  Bytes read from the transport are handed to a
//! [`handshake::Handshake`] until it reports completion, and afterwards to a
//! [`sessions::ServerSession`], which returns packets to write back to the peer and events the
//! hosting application reacts to (publish requests, media, metadata, ...).
//!
//! Media payloads are reassembled into [`buffers::RentedBuffer`]s taken from a shared
//! [`buffers::BufferPool`], so the same bytes can be handed to any number of subscribers without
//! copying and go back to the pool once the last holder lets go.

#[cfg(test)]
#[macro_use]
mod test_utils;

pub mod buffers;
pub mod chunk_io;
pub mod handshake;
pub mod messages;
pub mod sessions;
pub mod time;
