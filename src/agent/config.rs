use crate::constants::{
    DEFAULT_ADMISSION_HAVE_COUNT, DEFAULT_MAX_PEERS_PER_PIECE, DEFAULT_MAX_SWARM_SIZE,
    DEFAULT_NUM_WANT, DEFAULT_PORT,
};
use crate::peer::PeerId;
use std::net::IpAddr;
use std::path::PathBuf;

/// Process-wide settings handed to [`Agent::new`](super::Agent::new).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Our peer id, sent in every handshake and announce.
    pub peer_id: PeerId,
    /// Port to accept peers on and to announce. Zero binds an ephemeral port.
    pub listen_port: u16,
    /// Directory the torrent files are created in.
    pub download_dir: PathBuf,
    pub max_swarm_size: usize,
    /// How many peers one piece is requested from.
    pub max_peers_per_piece: usize,
    /// Our own address as trackers see it; matching peers are dropped from
    /// announce responses.
    pub local_ip: Option<IpAddr>,
    pub num_want: u32,
    /// Have messages sent to a freshly admitted peer.
    pub admission_have_count: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            listen_port: DEFAULT_PORT,
            download_dir: PathBuf::from("."),
            max_swarm_size: DEFAULT_MAX_SWARM_SIZE,
            max_peers_per_piece: DEFAULT_MAX_PEERS_PER_PIECE,
            local_ip: None,
            num_want: DEFAULT_NUM_WANT,
            admission_have_count: DEFAULT_ADMISSION_HAVE_COUNT,
        }
    }
}

impl AgentConfig {
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = peer_id;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_max_swarm_size(mut self, size: usize) -> Self {
        self.max_swarm_size = size;
        self
    }

    pub fn with_max_peers_per_piece(mut self, peers: usize) -> Self {
        self.max_peers_per_piece = peers;
        self
    }

    pub fn with_local_ip(mut self, ip: IpAddr) -> Self {
        self.local_ip = Some(ip);
        self
    }

    pub fn with_num_want(mut self, num_want: u32) -> Self {
        self.num_want = num_want;
        self
    }

    pub fn with_admission_have_count(mut self, count: usize) -> Self {
        self.admission_have_count = count;
        self
    }
}
