use super::error::StorageError;
use super::file::file_spans;
use crate::peer::{BlockRequest, PeerHandle};
use crate::torrent::TorrentContext;
use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A verified piece waiting to be written.
pub struct WriteRequest {
    pub ctx: Arc<TorrentContext>,
    pub piece: u32,
    pub data: Bytes,
}

/// A block a peer asked us for.
pub struct ReadRequest {
    pub ctx: Arc<TorrentContext>,
    pub peer: Arc<PeerHandle>,
    pub block: BlockRequest,
}

/// Handle to the two shared disk workers.
///
/// One writer drains verified pieces to the file set; one request server
/// answers peer Requests. Both are shared by every torrent of an agent and
/// keep running when a single operation fails.
#[derive(Clone)]
pub struct DiskIo {
    writes: mpsc::UnboundedSender<WriteRequest>,
    reads: mpsc::UnboundedSender<ReadRequest>,
}

impl DiskIo {
    /// Spawns both workers. They exit when `shutdown` is cancelled.
    pub fn start(shutdown: CancellationToken) -> Self {
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (reads, read_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(write_rx, shutdown.clone()));
        tokio::spawn(run_request_server(read_rx, shutdown));

        Self { writes, reads }
    }

    pub fn queue_write(&self, request: WriteRequest) {
        let piece = request.piece;
        if self.writes.send(request).is_err() {
            warn!("disk writer stopped, dropping piece {}", piece);
        }
    }

    pub fn queue_read(&self, request: ReadRequest) {
        if let Err(e) = self.reads.send(request) {
            warn!("disk request server stopped, closing {}", e.0.peer.addr());
            e.0.ctx.close_peer(&e.0.peer);
        }
    }
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<WriteRequest>, shutdown: CancellationToken) {
    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let WriteRequest { ctx, piece, data } = request;
        let len = data.len() as u64;

        if let Err(e) = write_piece(&ctx, piece, &data).await {
            warn!("failed to write piece {} of {}: {}", piece, ctx.name(), e);
            if let Err(e) = ctx.revert_piece(piece) {
                warn!("cannot requeue piece {} of {}: {}", piece, ctx.name(), e);
            }
            continue;
        }

        ctx.add_downloaded(len);
        trace!("wrote piece {} of {}", piece, ctx.name());

        ctx.notify_disk_event();
        ctx.report_progress(piece);
    }

    debug!("disk writer stopped");
}

async fn run_request_server(
    mut rx: mpsc::UnboundedReceiver<ReadRequest>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let ReadRequest { ctx, peer, block } = request;
        if peer.is_closed() {
            continue;
        }

        let data = match read_block(&ctx, block).await {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to read {:?} for {}: {}", block, peer.addr(), e);
                ctx.close_peer(&peer);
                continue;
            }
        };

        let len = data.len() as u64;
        match peer.send_piece(block.piece, block.offset, data).await {
            Ok(()) => ctx.add_uploaded(len),
            Err(e) => {
                debug!("failed to send block to {}: {}", peer.addr(), e);
                ctx.close_peer(&peer);
            }
        }
    }

    debug!("disk request server stopped");
}

/// Writes a whole piece across every file it intersects. Files are opened
/// per call.
pub async fn write_piece(ctx: &TorrentContext, piece: u32, data: &[u8]) -> Result<(), StorageError> {
    let expected = ctx
        .piece_byte_length(piece)
        .map_err(|_| StorageError::InvalidPieceIndex(piece))?;
    if data.len() != expected as usize {
        return Err(StorageError::InvalidPieceLength {
            piece,
            expected,
            actual: data.len(),
        });
    }

    let start = piece as u64 * ctx.piece_length() as u64;
    let mut written = 0usize;

    for span in file_spans(ctx.files(), start, data.len() as u64) {
        let path = ctx.download_dir().join(&ctx.files()[span.file_index].path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        file.seek(SeekFrom::Start(span.file_offset)).await?;
        let chunk = &data[written..written + span.length as usize];
        file.write_all(chunk).await?;
        file.flush().await?;

        written += span.length as usize;
    }

    Ok(())
}

/// Reads a whole piece from disk at its actual length.
pub async fn read_piece(ctx: &TorrentContext, piece: u32) -> Result<Bytes, StorageError> {
    let length = ctx
        .piece_byte_length(piece)
        .map_err(|_| StorageError::InvalidPieceIndex(piece))?;

    let start = piece as u64 * ctx.piece_length() as u64;
    let mut data = vec![0u8; length as usize];
    let mut read = 0usize;

    for span in file_spans(ctx.files(), start, length as u64) {
        let path = ctx.download_dir().join(&ctx.files()[span.file_index].path);
        let mut file = OpenOptions::new().read(true).open(&path).await?;

        file.seek(SeekFrom::Start(span.file_offset)).await?;
        file.read_exact(&mut data[read..read + span.length as usize])
            .await?;

        read += span.length as usize;
    }

    Ok(Bytes::from(data))
}

/// Reads the piece containing `block` and slices the block out of it.
async fn read_block(ctx: &TorrentContext, block: BlockRequest) -> Result<Bytes, StorageError> {
    let piece = read_piece(ctx, block.piece).await?;
    let start = block.offset as usize;
    let end = start + block.length as usize;
    if end > piece.len() {
        return Err(StorageError::InvalidBlock {
            piece: block.piece,
            offset: block.offset,
            length: block.length,
        });
    }
    Ok(piece.slice(start..end))
}
