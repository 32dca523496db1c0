use thiserror::Error;

/// Errors that can occur during peer communication.
///
/// Every variant is connection-local: it closes the peer that produced it
/// and never the torrent.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake was not a BitTorrent handshake.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),

    /// The peer's info hash doesn't match ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A length prefix exceeded the hard message limit.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// The connection was closed by the peer or by us.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,
}
