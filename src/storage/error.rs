use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("piece {piece} has {actual} bytes, expected {expected}")]
    InvalidPieceLength { piece: u32, expected: u32, actual: usize },

    #[error("invalid block: piece {piece}, offset {offset}, length {length}")]
    InvalidBlock { piece: u32, offset: u32, length: u32 },

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),

    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
