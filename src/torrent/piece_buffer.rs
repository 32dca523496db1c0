use crate::constants::BLOCK_SIZE;
use crate::peer::{block_count, block_length, Bitfield, BlockRequest};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Reassembly buffer for the piece currently being downloaded.
///
/// One buffer per torrent is reused across pieces: [`reset`](Self::reset)
/// resizes the existing allocation instead of allocating a new one. Blocks
/// from several peers may land concurrently; each write takes the internal
/// lock, and the write that fills the last hole signals completion.
pub struct PieceBuffer {
    inner: Mutex<Inner>,
    complete: Notify,
}

struct Inner {
    piece: Option<u32>,
    length: u32,
    data: Vec<u8>,
    present: Bitfield,
    remaining: u32,
}

impl PieceBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                piece: None,
                length: 0,
                data: Vec::new(),
                present: Bitfield::new(0),
                remaining: 0,
            }),
            complete: Notify::new(),
        }
    }

    /// Prepares the buffer for `piece` of `length` bytes.
    pub fn reset(&self, piece: u32, length: u32) {
        let mut inner = self.inner.lock();
        let blocks = block_count(length);
        inner.piece = Some(piece);
        inner.length = length;
        inner.data.clear();
        inner.data.resize(length as usize, 0);
        inner.present = Bitfield::new(blocks as usize);
        inner.remaining = blocks;
    }

    /// Detaches the buffer from its piece; later blocks are discarded.
    pub fn clear(&self) {
        self.inner.lock().piece = None;
    }

    pub fn piece(&self) -> Option<u32> {
        self.inner.lock().piece
    }

    /// Stores one block. Returns `false` and stores nothing when the block
    /// belongs to another piece, is misaligned, has the wrong length, or
    /// has already arrived.
    pub fn write_block(&self, piece: u32, offset: u32, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        if inner.piece != Some(piece) || offset % BLOCK_SIZE != 0 {
            return false;
        }

        let index = offset / BLOCK_SIZE;
        if index as usize >= inner.present.len()
            || inner.present.has(index as usize)
            || data.len() != block_length(inner.length, index) as usize
        {
            return false;
        }

        let start = offset as usize;
        inner.data[start..start + data.len()].copy_from_slice(data);
        inner.present.set(index as usize);
        inner.remaining -= 1;

        if inner.remaining == 0 {
            self.complete.notify_one();
        }
        true
    }

    pub fn blocks_remaining(&self) -> u32 {
        self.inner.lock().remaining
    }

    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.piece.is_some() && inner.remaining == 0
    }

    /// Requests for every block that has not arrived yet.
    pub fn missing_blocks(&self) -> Vec<BlockRequest> {
        let inner = self.inner.lock();
        let Some(piece) = inner.piece else {
            return Vec::new();
        };
        (0..inner.present.len() as u32)
            .filter(|&i| !inner.present.has(i as usize))
            .map(|i| BlockRequest::new(piece, i * BLOCK_SIZE, block_length(inner.length, i)))
            .collect()
    }

    /// Waits for the next completion signal. Callers re-check
    /// [`is_complete`](Self::is_complete) afterwards.
    pub async fn notified(&self) {
        self.complete.notified().await;
    }

    /// Copies the assembled bytes out.
    pub fn data(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock().data)
    }
}

impl Default for PieceBuffer {
    fn default() -> Self {
        Self::new()
    }
}
