//! Piece and peer selection.
//!
//! Piece choice is "first missing piece that some peer has", scanning from
//! a rotating start position. This is not rarest-first.

use super::context::TorrentContext;
use crate::peer::PeerHandle;
use std::sync::Arc;

/// Returns the first piece at or after `start` (wrapping) that is missing
/// and advertised by at least one peer, and clears its missing bit so no
/// other iteration picks it while it is in flight.
pub fn next_piece(ctx: &TorrentContext, start: u32) -> Option<u32> {
    let n = ctx.num_pieces();
    if n == 0 {
        return None;
    }

    let mut state = ctx.pieces();
    for i in 0..n {
        let piece = (start % n + i) % n;
        if state.missing.has(piece as usize) && state.info[piece as usize].peer_count > 0 {
            state.missing.clear(piece as usize);
            return Some(piece);
        }
    }
    None
}

/// Active peers that are not choking us and have `piece`, fastest first by
/// average response time. Peers without a measurement count as zero.
pub fn peers_for_piece(ctx: &TorrentContext, piece: u32, max_peers: usize) -> Vec<Arc<PeerHandle>> {
    let mut peers: Vec<_> = ctx
        .peers()
        .into_iter()
        .filter(|p| p.is_active() && !p.is_choking_us() && p.has_piece(piece))
        .collect();
    peers.sort_by_key(|p| p.average_response_time());
    peers.truncate(max_peers);
    peers
}

/// Up to `n` local pieces that `peer` lacks, scanning from `start`.
pub fn local_piece_suggestions(
    ctx: &TorrentContext,
    peer: &PeerHandle,
    n: usize,
    start: u32,
) -> Vec<u32> {
    let count = ctx.num_pieces();
    if count == 0 {
        return Vec::new();
    }

    let local = ctx.local_bitfield();
    (0..count)
        .map(|i| (start % count + i) % count)
        .filter(|&p| local.has(p as usize) && !peer.has_piece(p))
        .take(n)
        .collect()
}
