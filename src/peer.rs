//! Peer wire protocol (BEP-3)
//!
//! Message framing and the handshake live in `message`; `transport` moves
//! frames over any async byte stream. A connected peer is represented by a
//! shared [`PeerHandle`] driven by the read loop in `session`.

mod bitfield;
mod choking;
mod connection;
mod error;
mod handle;
mod message;
mod peer_id;
mod piece;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use choking::ChokingState;
pub use connection::{answer_handshake, connect, initiate_handshake, receive_handshake, PeerState};
pub use error::PeerError;
pub use handle::PeerHandle;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN, PROTOCOL};
pub use peer_id::PeerId;
pub use piece::{block_count, block_length, BlockRequest};
pub use session::spawn_session;
pub use transport::{read_handshake, write_handshake, BoxedReader, BoxedWriter, FrameReader, FrameWriter};

#[cfg(test)]
mod tests;
