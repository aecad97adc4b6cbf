//! Reliable, ordered, connection oriented messaging over UDP.
//!
//! A [`Server`] accepts connections on one socket, a [`Client`] opens a single
//! connection. Both sides deliver received payloads to a [`Handler`] and send
//! through a [`Connection`] handle.

mod client;
mod config;
mod handler;
mod protocol;
mod server;
mod socket;

pub use client::*;
pub use config::*;
pub use handler::*;
pub use protocol::{Connection, SendError};
pub use protocol::{HEADER_SIZE, MAX_CHUNKS, MAX_DATA_PER_CHUNK, MAX_PACKET_SIZE};
pub use protocol::{MAX_PAYLOAD_SIZE, VERSION_MARKER, WINDOW_SIZE};
pub use server::*;
pub use socket::DatagramSocket;
