use super::context::{TorrentContext, TorrentStatus};
use super::selector::{next_piece, peers_for_piece};
use crate::constants::{IDLE_DELAY, PIECE_TIMEOUT};
use crate::error::Error;
use crate::peer::PeerHandle;
use crate::storage::{DiskIo, WriteRequest};
use crate::tracker::{Tracker, TrackerEvent};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Verified,
    NoPeers,
    HashMismatch,
    Cancelled,
}

enum Wait {
    Complete,
    TimedOut,
    Cancelled,
}

/// The download and seed loop of one torrent.
///
/// Waits for the pause gate and the first tracker announce, downloads
/// piece by piece until every piece is local, then seeds until the torrent
/// is closed. An error ends the task for good; it is not restarted.
pub struct Assembler {
    ctx: Arc<TorrentContext>,
    disk: DiskIo,
    tracker: Option<Arc<Tracker>>,
    max_peers_per_piece: usize,
    next_start: u32,
    verified: u32,
}

impl Assembler {
    pub fn new(
        ctx: Arc<TorrentContext>,
        disk: DiskIo,
        tracker: Option<Arc<Tracker>>,
        max_peers_per_piece: usize,
    ) -> Self {
        Self {
            ctx,
            disk,
            tracker,
            max_peers_per_piece,
            next_start: 0,
            verified: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let ctx = self.ctx.clone();
            if let Err(e) = self.run().await {
                error!(
                    "assembler for {} terminated, torrent will make no further progress: {}",
                    ctx.name(),
                    e
                );
            }
        })
    }

    async fn run(mut self) -> Result<(), Error> {
        let token = self.ctx.token().clone();

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = self.ctx.wait_running() => {}
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = self.ctx.wait_tracker_started() => {}
        }

        // A failed write puts its piece back into the missing set, so the
        // download resumes until every byte is on disk.
        loop {
            if self.ctx.missing_piece_count() > 0 {
                self.ctx.set_status(TorrentStatus::Downloading);
                info!("{}: downloading {} pieces", self.ctx.name(), self.ctx.missing_piece_count());
                if !self.download().await? {
                    return Ok(());
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                _ = self.ctx.wait_download_settled() => {}
            }
            if self.ctx.bytes_left_to_download() == 0 {
                break;
            }
        }

        self.seed().await;
        Ok(())
    }

    /// Returns `false` if the torrent was cancelled before completion.
    async fn download(&mut self) -> Result<bool, Error> {
        let token = self.ctx.token().clone();

        while self.ctx.missing_piece_count() > 0 {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(false),
                _ = self.ctx.wait_running() => {}
            }

            let Some(piece) = next_piece(&self.ctx, self.next_start) else {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(false),
                    _ = tokio::time::sleep(IDLE_DELAY) => {}
                }
                continue;
            };
            self.next_start = (piece + 1) % self.ctx.num_pieces();

            let attempt = self.download_piece(piece).await?;
            for peer in self.ctx.peers() {
                peer.forget_requests(piece);
            }
            if !self.ctx.is_piece_local(piece)? {
                self.ctx.mark_piece_missing(piece, true)?;
            }
            if attempt == Attempt::Cancelled {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn download_piece(&mut self, piece: u32) -> Result<Attempt, Error> {
        let mut peers = peers_for_piece(&self.ctx, piece, self.max_peers_per_piece);
        if peers.is_empty() {
            trace!("no unchoked peer has piece {}", piece);
            return Ok(Attempt::NoPeers);
        }

        let length = self.ctx.piece_byte_length(piece)?;
        let buffer = self.ctx.piece_buffer();
        buffer.reset(piece, length);
        debug!(
            "requesting piece {} ({} bytes) from {} peers",
            piece,
            length,
            peers.len()
        );

        let mut next_peer = 0;
        loop {
            self.request_missing(&peers, &mut next_peer).await;

            match self.wait_for_piece().await {
                Wait::Complete => break,
                Wait::Cancelled => {
                    buffer.clear();
                    return Ok(Attempt::Cancelled);
                }
                Wait::TimedOut => {
                    peers = peers_for_piece(&self.ctx, piece, self.max_peers_per_piece);
                    if peers.is_empty() {
                        debug!("piece {} timed out with no peers left", piece);
                        buffer.clear();
                        return Ok(Attempt::NoPeers);
                    }
                    debug!(
                        "piece {} timed out, re-requesting {} blocks",
                        piece,
                        buffer.blocks_remaining()
                    );
                }
            }
        }

        let data = buffer.data();
        buffer.clear();

        if !self.ctx.check_piece_hash(piece, &data)? {
            warn!("{}: hash mismatch for piece {}, discarding", self.ctx.name(), piece);
            return Ok(Attempt::HashMismatch);
        }

        self.disk.queue_write(WriteRequest {
            ctx: self.ctx.clone(),
            piece,
            data,
        });
        self.ctx.mark_piece_local(piece, true)?;
        self.verified += 1;
        debug!("{}: piece {} verified", self.ctx.name(), piece);

        self.broadcast_have(piece).await;
        Ok(Attempt::Verified)
    }

    /// Sends one Request per missing block, rotating through `peers`. A peer
    /// whose send fails is closed and the block goes to the next one.
    async fn request_missing(&self, peers: &[Arc<PeerHandle>], next_peer: &mut usize) {
        for block in self.ctx.piece_buffer().missing_blocks() {
            for _ in 0..peers.len() {
                let peer = &peers[*next_peer % peers.len()];
                *next_peer += 1;
                if peer.is_closed() {
                    continue;
                }
                match peer.send_request(block).await {
                    Ok(()) => break,
                    Err(e) => {
                        debug!("request to {} failed: {}", peer.addr(), e);
                        self.ctx.close_peer(peer);
                    }
                }
            }
        }
    }

    async fn wait_for_piece(&self) -> Wait {
        let buffer = self.ctx.piece_buffer();
        let deadline = Instant::now() + PIECE_TIMEOUT;

        loop {
            if buffer.is_complete() {
                return Wait::Complete;
            }
            tokio::select! {
                biased;
                _ = self.ctx.token().cancelled() => return Wait::Cancelled,
                _ = buffer.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Wait::TimedOut,
            }
        }
    }

    async fn broadcast_have(&self, piece: u32) {
        for peer in self.ctx.peers() {
            if let Err(e) = peer.send_have(piece).await {
                debug!("have to {} failed: {}", peer.addr(), e);
                self.ctx.close_peer(&peer);
            }
        }
    }

    /// Seeds until the torrent is closed. No requests go out from here;
    /// incoming requests are served by the peer sessions and the disk
    /// request server.
    async fn seed(&self) {
        if let Some(tracker) = &self.tracker {
            if self.verified > 0 {
                if let Err(e) = tracker.announce(TrackerEvent::Completed).await {
                    warn!("{}: completed announce failed: {}", self.ctx.name(), e);
                }
            }
            tracker.set_seeding();
        }

        self.ctx.set_status(TorrentStatus::Seeding);
        info!("{}: download complete, seeding", self.ctx.name());

        for peer in self.ctx.peers() {
            if peer.choking().am_interested {
                if let Err(e) = peer.send_not_interested().await {
                    debug!("not-interested to {} failed: {}", peer.addr(), e);
                    self.ctx.close_peer(&peer);
                }
            }
        }

        self.ctx.token().cancelled().await;
    }
}
