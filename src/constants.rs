//! Protocol constants and tuning parameters.
//!
//! Wire-level values come from BEP-3 and BEP-15. Timeouts and limits are the
//! defaults used by [`AgentConfig`](crate::AgentConfig) and the download loop.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-RS0001-";

/// User agent string for HTTP tracker requests
pub const USER_AGENT: &str = "rswarm/0.1.0";

/// Default BitTorrent listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Wire protocol
// ============================================================================

/// Block size used for every Request message (16 KiB).
pub const BLOCK_SIZE: u32 = 16384;

/// Nominal payload size of a Piece message carrying one full block.
/// Peer read buffers start at this size and grow for larger messages.
pub const NOMINAL_MESSAGE_LEN: usize = 9 + BLOCK_SIZE as usize;

/// Hard upper bound on a single message payload.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Interval between keep-alive messages on an otherwise idle connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

// ============================================================================
// Connection limits
// ============================================================================

/// Default upper bound on connected peers per torrent.
pub const DEFAULT_MAX_SWARM_SIZE: usize = 50;

/// Default number of peers a single piece is requested from.
pub const DEFAULT_MAX_PEERS_PER_PIECE: usize = 5;

/// Default number of Have messages sent to a newly admitted peer.
pub const DEFAULT_ADMISSION_HAVE_COUNT: usize = 32;

/// TCP connection timeout for outbound peers.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake timeout after TCP connect.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write timeout for a single framed message.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Assembler
// ============================================================================

/// How long the assembler waits for a piece before re-requesting its
/// missing blocks.
pub const PIECE_TIMEOUT: Duration = Duration::from_secs(60);

/// Back-off when no piece is currently available from the swarm.
pub const IDLE_DELAY: Duration = Duration::from_millis(100);

/// Weight of the newest sample in a peer's response-time moving average.
pub const RESPONSE_TIME_WEIGHT: f64 = 0.25;

// ============================================================================
// Tracker
// ============================================================================

/// Announce interval used before a tracker has told us its own.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Announce interval once a torrent is seeding.
pub const SEEDING_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Lower bound applied to tracker-supplied intervals.
pub const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP tracker request timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// UDP tracker receive timeout for the first attempt; doubled on each resend.
pub const UDP_TIMEOUT: Duration = Duration::from_secs(15);

/// Resends of a UDP tracker command after the first attempt times out.
pub const UDP_MAX_RETRIES: u32 = 3;

/// Default number of peers requested per announce.
pub const DEFAULT_NUM_WANT: u32 = 50;
