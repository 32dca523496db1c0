//! Fixtures shared by the unit tests.

use crate::metainfo::Metainfo;
use crate::peer::{FrameReader, FrameWriter, PeerHandle, PeerId};
use crate::torrent::TorrentContext;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Deterministic, non-repeating-per-block content.
pub(crate) fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn piece_hashes(data: &[u8], piece_length: u32) -> Bytes {
    let mut hashes = Vec::with_capacity(data.len().div_ceil(piece_length as usize) * 20);
    for chunk in data.chunks(piece_length as usize) {
        hashes.extend_from_slice(&Sha1::digest(chunk));
    }
    Bytes::from(hashes)
}

/// Single-file metainfo whose piece hashes describe `data`.
pub(crate) fn single_file(name: &str, data: &[u8], piece_length: u32) -> Metainfo {
    Metainfo::new(
        name,
        Some("udp://127.0.0.1:9/announce"),
        piece_length,
        piece_hashes(data, piece_length),
        vec![(PathBuf::from(name), data.len() as u64)],
    )
    .unwrap()
}

/// Multi-file metainfo: `data` is split into files of `lengths` under `name/`.
pub(crate) fn multi_file(name: &str, data: &[u8], piece_length: u32, lengths: &[u64]) -> Metainfo {
    assert_eq!(lengths.iter().sum::<u64>(), data.len() as u64);
    let files = lengths
        .iter()
        .enumerate()
        .map(|(i, &len)| (Path::new(name).join(format!("part{}.bin", i)), len))
        .collect();
    Metainfo::new(
        name,
        Some("udp://127.0.0.1:9/announce"),
        piece_length,
        piece_hashes(data, piece_length),
        files,
    )
    .unwrap()
}

pub(crate) fn context(metainfo: &Metainfo, dir: &Path) -> Arc<TorrentContext> {
    Arc::new(TorrentContext::new(metainfo, dir, 50, CancellationToken::new()))
}

pub(crate) fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 6881))
}

/// A peer handle wired to an in-memory stream. Returns the handle, the
/// local read half for a session, and the remote end of the stream.
pub(crate) fn duplex_peer(
    ctx: &TorrentContext,
    addr: SocketAddr,
) -> (Arc<PeerHandle>, FrameReader, DuplexStream) {
    let (local, remote) = tokio::io::duplex(1 << 20);
    let (read, write) = tokio::io::split(local);
    let peer = Arc::new(PeerHandle::new(
        addr,
        PeerId::generate(),
        FrameWriter::new(Box::new(write)),
        ctx.num_pieces(),
        ctx.peer_token(),
    ));
    (peer, FrameReader::new(Box::new(read)), remote)
}

/// Splits the remote end of a duplex stream into framed halves.
pub(crate) fn remote_frames(stream: DuplexStream) -> (FrameReader, FrameWriter) {
    let (read, write) = tokio::io::split(stream);
    (FrameReader::new(Box::new(read)), FrameWriter::new(Box::new(write)))
}

/// A minimal BEP-15 tracker on localhost. Every announce is answered with
/// an 1800 second interval and `peers`; the event id of each announce it
/// receives is forwarded on the returned channel.
pub(crate) async fn fake_udp_tracker(
    peers: Vec<SocketAddr>,
) -> (String, mpsc::UnboundedReceiver<u32>) {
    let (url, events, _connects) = counting_udp_tracker(peers).await;
    (url, events)
}

/// Like [`fake_udp_tracker`], also counting the connect requests it answers.
pub(crate) async fn counting_udp_tracker(
    peers: Vec<SocketAddr>,
) -> (String, mpsc::UnboundedReceiver<u32>, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let url = format!("udp://{}/announce", socket.local_addr().unwrap());
    let (events, rx) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = connects.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let mut reply = BytesMut::new();
            match n {
                16 => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    reply.put_u32(0);
                    reply.put_slice(&buf[12..16]);
                    reply.put_u64(0x0123_4567_89ab_cdef);
                }
                100 => {
                    let _ = events.send(u32::from_be_bytes([buf[80], buf[81], buf[82], buf[83]]));
                    reply.put_u32(1);
                    reply.put_slice(&buf[12..16]);
                    reply.put_u32(1800);
                    reply.put_u32(1);
                    reply.put_u32(2);
                    for peer in &peers {
                        if let SocketAddr::V4(v4) = peer {
                            reply.put_slice(&v4.ip().octets());
                            reply.put_u16(v4.port());
                        }
                    }
                }
                _ => continue,
            }
            let _ = socket.send_to(&reply, from).await;
        }
    });

    (url, rx, connects)
}

/// A UDP socket that never answers. Returns its tracker URL and the number
/// of datagrams it has received.
pub(crate) async fn silent_udp_tracker() -> (String, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let url = format!("udp://{}/announce", socket.local_addr().unwrap());
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while socket.recv_from(&mut buf).await.is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    (url, received)
}

/// An http tracker URL on a local port nothing listens on.
pub(crate) async fn refused_http_tracker() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/announce", addr)
}
