use super::error::PeerError;
use super::handle::{MessageSummary, PeerHandle};
use super::message::Message;
use super::piece::BlockRequest;
use super::transport::FrameReader;
use crate::constants::{BLOCK_SIZE, KEEPALIVE_INTERVAL};
use crate::storage::{DiskIo, ReadRequest};
use crate::torrent::TorrentContext;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Spawns the read loop and the keep-alive sender for an admitted peer.
///
/// The read loop runs until the connection fails or the peer's token is
/// cancelled. Either way the peer is evicted from the swarm and its write
/// half shut down afterwards.
pub fn spawn_session(
    ctx: Arc<TorrentContext>,
    peer: Arc<PeerHandle>,
    reader: FrameReader,
    disk: DiskIo,
) -> JoinHandle<()> {
    tokio::spawn(keepalive_loop(ctx.clone(), peer.clone()));
    tokio::spawn(read_loop(ctx, peer, reader, disk))
}

async fn read_loop(
    ctx: Arc<TorrentContext>,
    peer: Arc<PeerHandle>,
    mut reader: FrameReader,
    disk: DiskIo,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = peer.token().cancelled() => break,
            result = reader.read_message() => result,
        };

        let result = match message {
            Ok(message) => handle_message(&ctx, &peer, &disk, message),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            match e {
                PeerError::ConnectionClosed => debug!("peer {} disconnected", peer.addr()),
                e => debug!("peer {} error: {}", peer.addr(), e),
            }
            break;
        }
    }

    ctx.close_peer(&peer);
    peer.shutdown().await;
}

async fn keepalive_loop(ctx: Arc<TorrentContext>, peer: Arc<PeerHandle>) {
    let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = peer.token().cancelled() => return,
            _ = interval.tick() => {
                if let Err(e) = peer.send_keepalive().await {
                    debug!("keep-alive to {} failed: {}", peer.addr(), e);
                    ctx.close_peer(&peer);
                    return;
                }
            }
        }
    }
}

/// Applies one message from `peer`. An error closes the connection.
pub(crate) fn handle_message(
    ctx: &Arc<TorrentContext>,
    peer: &Arc<PeerHandle>,
    disk: &DiskIo,
    message: Message,
) -> Result<(), PeerError> {
    trace!("peer {} -> {:?}", peer.addr(), MessageSummary(&message));

    match message {
        Message::KeepAlive => {}
        Message::Choke => peer.set_peer_choking(true),
        Message::Unchoke => peer.set_peer_choking(false),
        Message::Interested => peer.set_peer_interested(true),
        Message::NotInterested => peer.set_peer_interested(false),
        Message::Have { piece } => {
            if piece >= ctx.num_pieces() {
                return Err(PeerError::InvalidMessage(format!(
                    "have for piece {} of {}",
                    piece,
                    ctx.num_pieces()
                )));
            }
            ctx.record_have(peer, piece);
        }
        Message::Bitfield(bits) => {
            let expected = (ctx.num_pieces() as usize).div_ceil(8);
            if bits.len() != expected {
                return Err(PeerError::InvalidMessage(format!(
                    "bitfield of {} bytes, expected {}",
                    bits.len(),
                    expected
                )));
            }
            ctx.record_bitfield(peer, &bits);
        }
        Message::Request {
            index,
            begin,
            length,
        } => {
            if peer.am_choking() {
                debug!("ignoring request from choked peer {}", peer.addr());
                return Ok(());
            }
            let block = BlockRequest::new(index, begin, length);
            if !is_valid_request(ctx, &block) {
                return Err(PeerError::InvalidMessage(format!(
                    "invalid request {:?}",
                    block
                )));
            }
            if !ctx.is_piece_local(index).unwrap_or(false) {
                debug!("peer {} requested piece {} we don't have", peer.addr(), index);
                return Ok(());
            }
            disk.queue_read(ReadRequest {
                ctx: ctx.clone(),
                peer: peer.clone(),
                block,
            });
        }
        Message::Piece { index, begin, data } => {
            peer.record_block(index, begin, data.len());
            if !ctx.piece_buffer().write_block(index, begin, &data) {
                trace!(
                    "discarding block {}:{} from {}",
                    index,
                    begin,
                    peer.addr()
                );
            }
        }
        Message::Cancel {
            index,
            begin,
            length,
        } => {
            debug!(
                "peer {} cancelled {}:{}+{} (not honored)",
                peer.addr(),
                index,
                begin,
                length
            );
        }
        Message::Unknown { id, payload } => {
            warn!(
                "ignoring unknown message id {} ({} bytes) from {}",
                id,
                payload.len(),
                peer.addr()
            );
        }
    }

    Ok(())
}

/// The range must lie inside the piece and be no larger than one block.
fn is_valid_request(ctx: &TorrentContext, block: &BlockRequest) -> bool {
    if block.length == 0 || block.length > BLOCK_SIZE {
        return false;
    }
    let Ok(piece_len) = ctx.piece_byte_length(block.piece) else {
        return false;
    };
    block.offset as u64 + block.length as u64 <= piece_len as u64
}
