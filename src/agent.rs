//! Top-level orchestration.
//!
//! An [`Agent`] owns the torrent registry, accepts and dials peers, admits
//! them into swarms and exposes the control surface used by front ends:
//! add, start, pause, close and remove a torrent, query its status, and
//! register progress and tracker callbacks.

mod config;
mod manager;
mod status;

pub use config::AgentConfig;
pub use manager::Agent;
pub use status::TorrentSnapshot;
