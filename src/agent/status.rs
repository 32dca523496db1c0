use crate::metainfo::InfoHash;
use crate::torrent::TorrentStatus;
use crate::tracker::TrackerStatus;
use std::net::SocketAddr;

/// Point-in-time view of one torrent for user interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentSnapshot {
    pub file_name: String,
    pub status: TorrentStatus,
    pub peer_list: Vec<SocketAddr>,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub info_hash: InfoHash,
    /// Pieces not yet verified locally.
    pub missing_piece_count: u32,
    pub swarm_size: usize,
    pub dead_peer_count: u64,
    pub tracker_status: TrackerStatus,
}
