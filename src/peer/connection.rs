use super::error::PeerError;
use super::message::Handshake;
use super::peer_id::PeerId;
use super::transport::{read_handshake, write_handshake};
use crate::constants::{CONNECTION_TIMEOUT, HANDSHAKE_TIMEOUT};
use crate::metainfo::InfoHash;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Lifecycle of one peer connection. There is no way back from `Closed`;
/// redialing the same address creates a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    Active,
    Closed,
}

/// Dials `addr` and performs the outgoing handshake.
pub async fn connect(
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
) -> Result<(TcpStream, PeerId), PeerError> {
    debug!("connecting to {}", addr);

    let mut stream = timeout(CONNECTION_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::Timeout)??;
    stream.set_nodelay(true)?;

    let remote = initiate_handshake(&mut stream, info_hash, peer_id).await?;
    Ok((stream, remote))
}

/// Sends our handshake, then reads and validates the reply.
///
/// The protocol string and info hash must match what we sent; the remote
/// peer id is captured and returned without further checks.
pub async fn initiate_handshake<S>(
    stream: &mut S,
    info_hash: InfoHash,
    peer_id: PeerId,
) -> Result<PeerId, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = Handshake::new(info_hash.0, peer_id.0);

    timeout(HANDSHAKE_TIMEOUT, async {
        write_handshake(stream, &ours).await?;
        let theirs = read_handshake(stream).await?;
        if theirs.info_hash != ours.info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(PeerId(theirs.peer_id))
    })
    .await
    .map_err(|_| PeerError::Timeout)?
}

/// Reads the handshake of an incoming connection. The caller looks up the
/// torrent by the returned info hash and answers with [`answer_handshake`].
pub async fn receive_handshake<S>(stream: &mut S) -> Result<Handshake, PeerError>
where
    S: AsyncRead + Unpin,
{
    timeout(HANDSHAKE_TIMEOUT, read_handshake(stream))
        .await
        .map_err(|_| PeerError::Timeout)?
}

pub async fn answer_handshake<S>(
    stream: &mut S,
    info_hash: InfoHash,
    peer_id: PeerId,
) -> Result<(), PeerError>
where
    S: AsyncWrite + Unpin,
{
    let ours = Handshake::new(info_hash.0, peer_id.0);
    timeout(HANDSHAKE_TIMEOUT, write_handshake(stream, &ours))
        .await
        .map_err(|_| PeerError::Timeout)?
}
