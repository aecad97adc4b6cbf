mod ack_buffer;
mod chunk;
mod connection;
mod endpoint;
mod negotiator;
mod packet;
mod receiver;
mod recv_buffer;
mod resender;
mod sender;
mod seq_number;
mod state;

use ack_buffer::*;
use chunk::*;
use receiver::*;
use recv_buffer::*;

pub(crate) use endpoint::*;
pub(crate) use negotiator::*;
pub(crate) use packet::{Packet, PacketKind};
pub(crate) use sender::{check_reliable_payload, check_unreliable_payload};
pub(crate) use seq_number::*;
pub(crate) use state::*;

pub use connection::*;
pub use packet::{HEADER_SIZE, MAX_CHUNKS, MAX_DATA_PER_CHUNK, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE};
pub use packet::{VERSION_MARKER, WINDOW_SIZE};
pub use sender::SendError;
