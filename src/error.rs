use crate::bencode::BencodeError;
use crate::metainfo::{InfoHash, MetainfoError};
use crate::peer::PeerError;
use crate::storage::StorageError;
use crate::tracker::TrackerError;
use thiserror::Error;

/// Usage errors: a caller broke a precondition. These are never transient
/// and are kept apart from runtime failures so they can be matched on
/// separately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("torrent {0} is not registered")]
    TorrentNotFound(InfoHash),

    #[error("torrent {0} is already registered")]
    TorrentExists(InfoHash),

    #[error("torrent {0} has no tracker")]
    MissingTracker(InfoHash),

    #[error("torrent {0} is already started")]
    AlreadyStarted(InfoHash),

    #[error("torrent {0} is not running")]
    NotRunning(InfoHash),

    #[error("torrent {0} is already closed")]
    AlreadyClosed(InfoHash),

    #[error("tracker is already running")]
    TrackerRunning,

    #[error("piece {index} out of range (torrent has {count})")]
    PieceOutOfRange { index: u32, count: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// The library error. Every fallible public operation returns this.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for usage errors, false for runtime and protocol failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
