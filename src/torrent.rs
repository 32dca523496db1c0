//! Per-torrent download state and the assembler loop.
//!
//! [`TorrentContext`] holds the shared state of one torrent. The `selector`
//! functions choose what to request from whom, [`PieceBuffer`] reassembles
//! the piece in flight, and [`Assembler`] drives the whole cycle.

mod assembler;
mod context;
mod piece_buffer;
pub mod selector;

pub use assembler::Assembler;
pub use context::{PieceInfo, Progress, ProgressCallback, TorrentContext, TorrentStatus};
pub use piece_buffer::PieceBuffer;
