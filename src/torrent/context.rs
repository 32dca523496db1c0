use super::piece_buffer::PieceBuffer;
use crate::error::ValidationError;
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::{Bitfield, PeerHandle};
use crate::storage::FileEntry;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use sha1::{Digest, Sha1};
use std::fmt;
use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentStatus {
    Initialised,
    Downloading,
    Seeding,
    Paused,
    Ended,
}

impl fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TorrentStatus::Initialised => "initialised",
            TorrentStatus::Downloading => "downloading",
            TorrentStatus::Seeding => "seeding",
            TorrentStatus::Paused => "paused",
            TorrentStatus::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Availability and actual byte length of one piece.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PieceInfo {
    pub peer_count: u16,
    pub length: u32,
}

/// Reported to the progress callback after every successful piece write.
#[derive(Debug, Clone)]
pub struct Progress {
    pub info_hash: InfoHash,
    pub piece: u32,
    pub bytes_downloaded: u64,
    pub bytes_to_download: u64,
    pub missing_pieces: u32,
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Piece bookkeeping, guarded by one mutex because neighbouring pieces
/// share bitfield bytes.
pub(super) struct PieceState {
    pub(super) local: Bitfield,
    pub(super) missing: Bitfield,
    pub(super) info: Vec<PieceInfo>,
}

impl PieceState {
    fn count_peer(&mut self, piece: usize) {
        if let Some(info) = self.info.get_mut(piece) {
            info.peer_count = info.peer_count.saturating_add(1);
        }
    }
}

/// Everything shared about one torrent: identity, file layout, piece state,
/// the peer swarm, counters and the signals that drive the assembler.
pub struct TorrentContext {
    info_hash: InfoHash,
    name: String,
    announce: Option<String>,
    piece_length: u32,
    num_pieces: u32,
    piece_hashes: Bytes,
    files: Vec<FileEntry>,
    download_dir: PathBuf,
    pieces: Mutex<PieceState>,
    swarm: DashMap<IpAddr, Arc<PeerHandle>>,
    admission: Mutex<()>,
    max_swarm_size: usize,
    to_download: u64,
    downloaded: AtomicU64,
    uploaded: AtomicU64,
    dead_peers: AtomicU64,
    status: Mutex<TorrentStatus>,
    piece_buffer: PieceBuffer,
    cancel: CancellationToken,
    running: watch::Sender<bool>,
    tracker_started: watch::Sender<bool>,
    disk_events: watch::Sender<u64>,
    progress: RwLock<Option<ProgressCallback>>,
}

impl TorrentContext {
    /// Every piece starts missing and not local; the context starts paused.
    pub fn new(
        metainfo: &Metainfo,
        download_dir: impl Into<PathBuf>,
        max_swarm_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let num_pieces = metainfo.piece_count();
        let info = (0..num_pieces)
            .map(|i| PieceInfo {
                peer_count: 0,
                length: metainfo.piece_byte_length(i).unwrap_or(0),
            })
            .collect();

        Self {
            info_hash: metainfo.info_hash,
            name: metainfo.name.clone(),
            announce: metainfo.announce.clone(),
            piece_length: metainfo.piece_length,
            num_pieces,
            piece_hashes: metainfo.pieces.clone(),
            files: metainfo.files.clone(),
            download_dir: download_dir.into(),
            pieces: Mutex::new(PieceState {
                local: Bitfield::new(num_pieces as usize),
                missing: Bitfield::full(num_pieces as usize),
                info,
            }),
            swarm: DashMap::new(),
            admission: Mutex::new(()),
            max_swarm_size,
            to_download: metainfo.total_length,
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
            dead_peers: AtomicU64::new(0),
            status: Mutex::new(TorrentStatus::Initialised),
            piece_buffer: PieceBuffer::new(),
            cancel,
            running: watch::Sender::new(false),
            tracker_started: watch::Sender::new(false),
            disk_events: watch::Sender::new(0),
            progress: RwLock::new(None),
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn announce(&self) -> Option<&str> {
        self.announce.as_deref()
    }

    /// Nominal piece length; only the last piece may be shorter.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn num_pieces(&self) -> u32 {
        self.num_pieces
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn total_length(&self) -> u64 {
        self.to_download
    }

    fn check_index(&self, piece: u32) -> Result<usize, ValidationError> {
        if piece >= self.num_pieces {
            return Err(ValidationError::PieceOutOfRange {
                index: piece,
                count: self.num_pieces,
            });
        }
        Ok(piece as usize)
    }

    pub(super) fn pieces(&self) -> MutexGuard<'_, PieceState> {
        self.pieces.lock()
    }

    pub fn piece_byte_length(&self, piece: u32) -> Result<u32, ValidationError> {
        let index = self.check_index(piece)?;
        Ok(self.pieces.lock().info[index].length)
    }

    pub fn piece_hash(&self, piece: u32) -> Result<&[u8], ValidationError> {
        let index = self.check_index(piece)?;
        Ok(&self.piece_hashes[index * 20..index * 20 + 20])
    }

    /// True iff the SHA-1 of `data` equals the expected hash of `piece`.
    pub fn check_piece_hash(&self, piece: u32, data: &[u8]) -> Result<bool, ValidationError> {
        let expected = self.piece_hash(piece)?;
        Ok(Sha1::digest(data).as_slice() == expected)
    }

    pub fn mark_piece_local(&self, piece: u32, local: bool) -> Result<(), ValidationError> {
        let index = self.check_index(piece)?;
        self.pieces.lock().local.set_to(index, local);
        Ok(())
    }

    pub fn is_piece_local(&self, piece: u32) -> Result<bool, ValidationError> {
        let index = self.check_index(piece)?;
        Ok(self.pieces.lock().local.has(index))
    }

    pub fn mark_piece_missing(&self, piece: u32, missing: bool) -> Result<(), ValidationError> {
        let index = self.check_index(piece)?;
        self.pieces.lock().missing.set_to(index, missing);
        Ok(())
    }

    /// Puts a piece whose write failed back into the missing set so it is
    /// downloaded again.
    pub fn revert_piece(&self, piece: u32) -> Result<(), ValidationError> {
        let index = self.check_index(piece)?;
        {
            let mut state = self.pieces.lock();
            state.local.clear(index);
            state.missing.set(index);
        }
        self.notify_disk_event();
        Ok(())
    }

    pub fn is_piece_missing(&self, piece: u32) -> Result<bool, ValidationError> {
        let index = self.check_index(piece)?;
        Ok(self.pieces.lock().missing.has(index))
    }

    /// Number of pieces that are not yet local.
    pub fn missing_piece_count(&self) -> u32 {
        self.num_pieces - self.pieces.lock().local.count() as u32
    }

    pub fn local_bitfield(&self) -> Bitfield {
        self.pieces.lock().local.clone()
    }

    pub fn piece_info(&self, piece: u32) -> Result<PieceInfo, ValidationError> {
        let index = self.check_index(piece)?;
        Ok(self.pieces.lock().info[index])
    }

    /// Records a Have from `peer`, counting the piece towards availability
    /// the first time the peer advertises it.
    ///
    /// Eviction snapshots the remote bitfield under the same lock, so a
    /// closed peer records nothing and every counted piece is subtracted
    /// exactly once.
    pub fn record_have(&self, peer: &PeerHandle, piece: u32) {
        let mut state = self.pieces.lock();
        if !peer.is_closed() && peer.mark_have(piece) {
            state.count_peer(piece as usize);
        }
    }

    /// Merges a Bitfield from `peer`; see [`record_have`](Self::record_have).
    pub fn record_bitfield(&self, peer: &PeerHandle, bits: &[u8]) {
        let mut state = self.pieces.lock();
        if peer.is_closed() {
            return;
        }
        for piece in peer.merge_bitfield(bits) {
            state.count_peer(piece as usize);
        }
    }

    fn remove_availability(&self, peer: &PeerHandle) {
        let mut state = self.pieces.lock();
        let remote = peer.remote_bitfield();
        if remote.is_empty() {
            return;
        }
        for piece in remote.ones() {
            if let Some(info) = state.info.get_mut(piece) {
                info.peer_count = info.peer_count.saturating_sub(1);
            }
        }
    }

    /// False when `ip` is already connected or the swarm is full.
    pub fn is_space_in_swarm(&self, ip: IpAddr) -> bool {
        !self.swarm.contains_key(&ip) && self.swarm.len() < self.max_swarm_size
    }

    /// Inserts `peer` if its ip is not present and the swarm has room.
    /// The check and the insert happen under one lock so concurrent
    /// connects can never overrun the limit.
    pub fn admit_peer(&self, peer: Arc<PeerHandle>) -> bool {
        let _guard = self.admission.lock();
        if !self.is_space_in_swarm(peer.ip()) {
            return false;
        }
        debug!("admitting {} to {}", peer.addr(), self.name);
        self.swarm.insert(peer.ip(), peer);
        true
    }

    /// Closes `peer` and evicts it from the swarm, at most once. Its
    /// advertised pieces stop counting towards availability.
    pub fn close_peer(&self, peer: &Arc<PeerHandle>) {
        if !peer.close() {
            return;
        }
        let removed = {
            let _guard = self.admission.lock();
            self.swarm
                .remove_if(&peer.ip(), |_, p| Arc::ptr_eq(p, peer))
                .is_some()
        };
        if removed {
            self.remove_availability(peer);
            self.dead_peers.fetch_add(1, Ordering::Relaxed);
            debug!("evicted {} from {}", peer.addr(), self.name);
        }
    }

    /// Closes every peer in the swarm.
    pub fn close_all_peers(&self) {
        for peer in self.peers() {
            self.close_peer(&peer);
        }
    }

    pub fn peer(&self, ip: IpAddr) -> Option<Arc<PeerHandle>> {
        self.swarm.get(&ip).map(|p| p.value().clone())
    }

    pub fn peers(&self) -> Vec<Arc<PeerHandle>> {
        self.swarm.iter().map(|p| p.value().clone()).collect()
    }

    pub fn swarm_size(&self) -> usize {
        self.swarm.len()
    }

    pub fn max_swarm_size(&self) -> usize {
        self.max_swarm_size
    }

    pub fn dead_peer_count(&self) -> u64 {
        self.dead_peers.load(Ordering::Relaxed)
    }

    /// Adds to the downloaded counter, clamped so it never exceeds the
    /// torrent's total length.
    pub fn add_downloaded(&self, bytes: u64) {
        let to_download = self.to_download;
        let previous = self
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(bytes).min(to_download))
            })
            .unwrap_or_else(|current| current);
        if previous.saturating_add(bytes) > to_download {
            warn!(
                "{}: downloaded counter would exceed {} bytes, clamped",
                self.name, to_download
            );
        }
    }

    pub fn add_uploaded(&self, bytes: u64) {
        self.uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn bytes_left_to_download(&self) -> u64 {
        self.to_download.saturating_sub(self.bytes_downloaded())
    }

    pub fn status(&self) -> TorrentStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: TorrentStatus) {
        *self.status.lock() = status;
    }

    /// Moves the torrent to `Ended`. Returns `false` if it already was.
    pub fn mark_ended(&self) -> bool {
        let mut status = self.status.lock();
        if *status == TorrentStatus::Ended {
            return false;
        }
        *status = TorrentStatus::Ended;
        true
    }

    pub fn piece_buffer(&self) -> &PieceBuffer {
        &self.piece_buffer
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Token for a new peer; cancelled with the torrent.
    pub fn peer_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Opens the pause gate.
    pub fn resume(&self) {
        self.running.send_replace(true);
        let mut status = self.status.lock();
        if *status == TorrentStatus::Paused {
            *status = if self.bytes_left_to_download() == 0 {
                TorrentStatus::Seeding
            } else {
                TorrentStatus::Downloading
            };
        }
    }

    /// Closes the pause gate; the assembler stops at its next iteration.
    pub fn pause(&self) {
        self.running.send_replace(false);
        let mut status = self.status.lock();
        if *status != TorrentStatus::Ended {
            *status = TorrentStatus::Paused;
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub async fn wait_running(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| *running).await;
    }

    pub fn signal_tracker_started(&self) {
        self.tracker_started.send_replace(true);
    }

    pub async fn wait_tracker_started(&self) {
        let mut rx = self.tracker_started.subscribe();
        let _ = rx.wait_for(|started| *started).await;
    }

    /// Wakes everything waiting on disk progress. Called by the writer after
    /// each write, successful or not.
    pub fn notify_disk_event(&self) {
        self.disk_events.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Returns once every byte of the torrent has been written.
    pub async fn wait_download_finished(&self) {
        let mut rx = self.disk_events.subscribe();
        while self.bytes_left_to_download() > 0 {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Returns once every byte has been written or a piece has gone back to
    /// missing after a failed write.
    pub async fn wait_download_settled(&self) {
        let mut rx = self.disk_events.subscribe();
        while self.bytes_left_to_download() > 0 && self.missing_piece_count() == 0 {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.progress.write() = callback;
    }

    /// Invokes the progress callback. A panicking callback is logged and
    /// otherwise ignored.
    pub fn report_progress(&self, piece: u32) {
        let Some(callback) = self.progress.read().clone() else {
            return;
        };
        let progress = Progress {
            info_hash: self.info_hash,
            piece,
            bytes_downloaded: self.bytes_downloaded(),
            bytes_to_download: self.to_download,
            missing_pieces: self.missing_piece_count(),
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&progress))).is_err() {
            warn!("{}: progress callback panicked", self.name);
        }
    }
}

impl fmt::Debug for TorrentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorrentContext")
            .field("info_hash", &self.info_hash)
            .field("name", &self.name)
            .field("num_pieces", &self.num_pieces)
            .field("status", &self.status())
            .finish()
    }
}
