use super::bitfield::Bitfield;
use super::choking::ChokingState;
use super::connection::PeerState;
use super::error::PeerError;
use super::message::Message;
use super::peer_id::PeerId;
use super::piece::BlockRequest;
use super::transport::FrameWriter;
use crate::constants::RESPONSE_TIME_WEIGHT;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Shared handle to one connected remote peer.
///
/// The read loop, the assembler, the disk request server and the keep-alive
/// task all hold an `Arc<PeerHandle>`. Sends go through a single async write
/// mutex. [`close`](Self::close) is idempotent; only the first call reports
/// `true`, which lets the owner of the swarm evict the peer exactly once.
pub struct PeerHandle {
    addr: SocketAddr,
    peer_id: PeerId,
    state: Mutex<PeerState>,
    choking: Mutex<ChokingState>,
    remote: Mutex<Bitfield>,
    missing_piece_count: AtomicI64,
    writer: tokio::sync::Mutex<FrameWriter>,
    cancel: CancellationToken,
    closed: AtomicBool,
    timing: Mutex<ResponseTiming>,
    downloaded: AtomicU64,
    uploaded: AtomicU64,
}

#[derive(Default)]
struct ResponseTiming {
    pending: HashMap<(u32, u32), Instant>,
    average: Option<Duration>,
}

impl PeerHandle {
    /// `cancel` should be a child of the torrent's token so closing the
    /// torrent releases everything waiting on this peer.
    pub fn new(
        addr: SocketAddr,
        peer_id: PeerId,
        writer: FrameWriter,
        num_pieces: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            peer_id,
            state: Mutex::new(PeerState::Active),
            choking: Mutex::new(ChokingState::default()),
            remote: Mutex::new(Bitfield::new(num_pieces as usize)),
            missing_piece_count: AtomicI64::new(num_pieces as i64),
            writer: tokio::sync::Mutex::new(writer),
            cancel,
            closed: AtomicBool::new(false),
            timing: Mutex::new(ResponseTiming::default()),
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Active
    }

    pub fn choking(&self) -> ChokingState {
        *self.choking.lock()
    }

    pub fn is_choking_us(&self) -> bool {
        self.choking.lock().peer_choking
    }

    pub fn am_choking(&self) -> bool {
        self.choking.lock().am_choking
    }

    pub fn set_peer_choking(&self, choking: bool) {
        self.choking.lock().peer_choking = choking;
    }

    pub fn set_peer_interested(&self, interested: bool) {
        self.choking.lock().peer_interested = interested;
    }

    pub fn has_piece(&self, piece: u32) -> bool {
        self.remote.lock().has(piece as usize)
    }

    pub fn remote_bitfield(&self) -> Bitfield {
        self.remote.lock().clone()
    }

    /// Pieces the remote has not advertised yet.
    pub fn missing_piece_count(&self) -> i64 {
        self.missing_piece_count.load(Ordering::Relaxed)
    }

    /// Records a Have. Returns `true` if the piece was not known before.
    pub fn mark_have(&self, piece: u32) -> bool {
        let mut remote = self.remote.lock();
        if piece as usize >= remote.len() || remote.has(piece as usize) {
            return false;
        }
        remote.set(piece as usize);
        self.missing_piece_count.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Merges a Bitfield message into the remote bitfield and returns the
    /// pieces that were newly set, so availability is only counted once per
    /// piece however many times the remote advertises it.
    pub fn merge_bitfield(&self, bits: &[u8]) -> Vec<u32> {
        let mut remote = self.remote.lock();
        let incoming = Bitfield::from_bytes(bits, remote.len());
        let added: Vec<u32> = incoming
            .ones()
            .filter(|&i| !remote.has(i))
            .map(|i| i as u32)
            .collect();
        for &piece in &added {
            remote.set(piece as usize);
        }
        self.missing_piece_count
            .fetch_sub(added.len() as i64, Ordering::Relaxed);
        added
    }

    /// Exponential moving average of request-to-block latency. Zero until
    /// the first block arrives.
    pub fn average_response_time(&self) -> Duration {
        self.timing.lock().average.unwrap_or_default()
    }

    /// Folds the latency of a received block into the moving average.
    pub fn record_block(&self, piece: u32, offset: u32, len: usize) -> Option<Duration> {
        self.downloaded.fetch_add(len as u64, Ordering::Relaxed);

        let mut timing = self.timing.lock();
        let sent = timing.pending.remove(&(piece, offset))?;
        let sample = sent.elapsed();
        timing.average = Some(match timing.average {
            Some(avg) => avg.mul_f64(1.0 - RESPONSE_TIME_WEIGHT) + sample.mul_f64(RESPONSE_TIME_WEIGHT),
            None => sample,
        });
        Some(sample)
    }

    /// Stops the response clock for every outstanding request of `piece`.
    /// Called once an attempt at the piece is over, whoever served it.
    pub fn forget_requests(&self, piece: u32) {
        self.timing.lock().pending.retain(|&(p, _), _| p != piece);
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the peer closed and cancels its token. Returns `true` only for
    /// the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = PeerState::Closed;
        self.cancel.cancel();
        debug!("peer {} closed", self.addr);
        true
    }

    /// Shuts the write half down. Called by the read loop once it has
    /// exited, after cancellation has released every waiter.
    pub async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }

    pub async fn send(&self, message: &Message) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::ConnectionClosed);
        }
        trace!("peer {} <- {:?}", self.addr, MessageSummary(message));
        self.writer.lock().await.send(message).await
    }

    pub async fn send_keepalive(&self) -> Result<(), PeerError> {
        self.send(&Message::KeepAlive).await
    }

    pub async fn send_unchoke(&self) -> Result<(), PeerError> {
        self.choking.lock().am_choking = false;
        self.send(&Message::Unchoke).await
    }

    pub async fn send_interested(&self) -> Result<(), PeerError> {
        self.choking.lock().am_interested = true;
        self.send(&Message::Interested).await
    }

    pub async fn send_not_interested(&self) -> Result<(), PeerError> {
        self.choking.lock().am_interested = false;
        self.send(&Message::NotInterested).await
    }

    pub async fn send_have(&self, piece: u32) -> Result<(), PeerError> {
        self.send(&Message::Have { piece }).await
    }

    /// Sends a Request and starts the response clock for that block.
    pub async fn send_request(&self, block: BlockRequest) -> Result<(), PeerError> {
        self.timing
            .lock()
            .pending
            .insert((block.piece, block.offset), Instant::now());
        self.send(&Message::Request {
            index: block.piece,
            begin: block.offset,
            length: block.length,
        })
        .await
    }

    pub async fn send_piece(&self, piece: u32, offset: u32, data: Bytes) -> Result<(), PeerError> {
        let len = data.len() as u64;
        self.send(&Message::Piece {
            index: piece,
            begin: offset,
            data,
        })
        .await?;
        self.uploaded.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("addr", &self.addr)
            .field("peer_id", &self.peer_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Debug view of a message that leaves block payloads out of the logs.
pub(crate) struct MessageSummary<'a>(pub &'a Message);

impl std::fmt::Debug for MessageSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Message::Piece { index, begin, data } => {
                write!(f, "Piece {{ index: {}, begin: {}, len: {} }}", index, begin, data.len())
            }
            Message::Bitfield(bits) => write!(f, "Bitfield({} bytes)", bits.len()),
            other => write!(f, "{:?}", other),
        }
    }
}
