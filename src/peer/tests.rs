use super::session::handle_message;
use super::*;
use crate::metainfo::InfoHash;
use crate::storage::{write_piece, DiskIo};
use crate::test_util::{addr, content, context, duplex_peer, remote_frames, single_file};
use bytes::Bytes;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(&id1.0[..8], b"-RS0001-");
    assert_eq!(id1.client_id(), Some("RS0001"));
    assert!(PeerId::from_bytes(&[0u8; 19]).is_none());
}

#[test]
fn test_bitfield() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has(0));
    assert!(bf.is_empty());

    bf.set(0);
    assert!(bf.has(0));

    bf.set(99);
    assert!(bf.has(99));

    bf.clear(0);
    assert!(!bf.has(0));

    assert_eq!(bf.count(), 1);
    assert_eq!(bf.to_bytes().len(), 13);
}

#[test]
fn test_bitfield_msb_first() {
    let mut bf = Bitfield::new(10);
    bf.set(0);
    bf.set(9);
    assert_eq!(&bf.to_bytes()[..], &[0x80, 0x40]);
    assert_eq!(bf.ones().collect::<Vec<_>>(), vec![0, 9]);
}

#[test]
fn test_bitfield_from_bytes_clears_spare_bits() {
    let bf = Bitfield::from_bytes(&[0xFF, 0xFF], 10);
    assert_eq!(bf.count(), 10);
    assert!(bf.is_complete());
    assert_eq!(&bf.to_bytes()[..], &[0xFF, 0xC0]);

    let short = Bitfield::from_bytes(&[0x80], 16);
    assert!(short.has(0));
    assert!(!short.has(8));
}

#[test]
fn test_bitfield_out_of_range_ignored() {
    let mut bf = Bitfield::new(4);
    bf.set(4);
    bf.set(100);
    assert!(bf.is_empty());
    assert!(!bf.has(100));
    assert_eq!(&Bitfield::full(4).to_bytes()[..], &[0xF0]);
}

#[test]
fn test_block_geometry() {
    assert_eq!(block_count(32768), 2);
    assert_eq!(block_count(20000), 2);
    assert_eq!(block_count(1), 1);
    assert_eq!(block_length(20000, 0), 16384);
    assert_eq!(block_length(20000, 1), 3616);
    assert_eq!(block_length(20000, 2), 0);
}

#[test]
fn test_choking_state_default() {
    let state = ChokingState::default();
    assert!(state.am_choking);
    assert!(!state.am_interested);
    assert!(state.peer_choking);
    assert!(!state.peer_interested);
}

#[test]
fn test_handshake_encode_decode() {
    let info_hash = [1u8; 20];
    let peer_id = [2u8; 20];

    let handshake = Handshake::new(info_hash, peer_id);
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], PROTOCOL);
    assert_eq!(&encoded[20..28], &[0u8; 8]);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, info_hash);
    assert_eq!(decoded.peer_id, peer_id);
}

#[test]
fn test_handshake_rejects_bad_input() {
    let mut encoded = Handshake::new([1u8; 20], [2u8; 20]).encode().to_vec();

    assert!(matches!(
        Handshake::decode(&encoded[..67]),
        Err(PeerError::InvalidHandshake(_))
    ));

    encoded[0] = 18;
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::InvalidHandshake(_))
    ));

    encoded[0] = 19;
    encoded[1] = b'b';
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::InvalidHandshake(_))
    ));
}

#[test]
fn test_message_encode_decode() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xA0, 0x01])),
        Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            index: 7,
            begin: 0,
            data: Bytes::from_static(b"hello world"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
    ];

    for msg in messages {
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 4 + msg.payload_len());
        let decoded = Message::decode(encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn test_message_wire_layout() {
    let request = Message::Request {
        index: 1,
        begin: 2,
        length: 3,
    };
    assert_eq!(
        &request.encode()[..],
        &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
    );
    assert_eq!(&Message::KeepAlive.encode()[..], &[0, 0, 0, 0]);
    assert_eq!(&Message::Have { piece: 258 }.encode()[..], &[0, 0, 0, 5, 4, 0, 0, 1, 2]);
}

#[test]
fn test_unknown_message_id() {
    let decoded = Message::decode_payload(Bytes::from_static(&[20, 0xde, 0xad])).unwrap();
    assert_eq!(
        decoded,
        Message::Unknown {
            id: 20,
            payload: Bytes::from_static(&[0xde, 0xad]),
        }
    );
}

#[test]
fn test_truncated_messages_rejected() {
    assert!(matches!(
        Message::decode_payload(Bytes::from_static(&[4, 0, 0])),
        Err(PeerError::InvalidMessage(_))
    ));
    assert!(matches!(
        Message::decode_payload(Bytes::from_static(&[6, 0, 0, 0, 1])),
        Err(PeerError::InvalidMessage(_))
    ));
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 5, 4])),
        Err(PeerError::InvalidMessage(_))
    ));
}

#[tokio::test]
async fn test_frame_reader() {
    let (local, mut remote) = tokio::io::duplex(1 << 20);
    let mut reader = FrameReader::new(Box::new(local));

    let bits = Bytes::from(vec![0xFFu8; 100_000]);
    remote.write_all(&Message::KeepAlive.encode()).await.unwrap();
    remote
        .write_all(&Message::Bitfield(bits.clone()).encode())
        .await
        .unwrap();
    remote.write_all(&Message::Have { piece: 9 }.encode()).await.unwrap();
    drop(remote);

    assert_eq!(reader.read_message().await.unwrap(), Message::KeepAlive);
    assert_eq!(reader.read_message().await.unwrap(), Message::Bitfield(bits));
    assert_eq!(reader.read_message().await.unwrap(), Message::Have { piece: 9 });
    assert!(matches!(
        reader.read_message().await,
        Err(PeerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_frame_reader_rejects_oversized_length() {
    let (local, mut remote) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(Box::new(local));

    remote.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    assert!(matches!(
        reader.read_message().await,
        Err(PeerError::MessageTooLarge(_))
    ));
}

#[tokio::test]
async fn test_handshake_exchange() {
    let info_hash = InfoHash([7u8; 20]);
    let ours = PeerId::generate();
    let theirs = PeerId::generate();
    let (mut a, mut b) = tokio::io::duplex(1024);

    let responder = tokio::spawn(async move {
        let hs = receive_handshake(&mut b).await.unwrap();
        answer_handshake(&mut b, InfoHash(hs.info_hash), theirs)
            .await
            .unwrap();
        hs
    });

    let remote = initiate_handshake(&mut a, info_hash, ours).await.unwrap();
    assert_eq!(remote, theirs);

    let received = responder.await.unwrap();
    assert_eq!(received.info_hash, info_hash.0);
    assert_eq!(received.peer_id, ours.0);
}

#[tokio::test]
async fn test_initiate_handshake_info_hash_mismatch() {
    let (mut a, mut b) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        let _ = receive_handshake(&mut b).await;
        let _ = answer_handshake(&mut b, InfoHash([9u8; 20]), PeerId::generate()).await;
    });

    let result = initiate_handshake(&mut a, InfoHash([7u8; 20]), PeerId::generate()).await;
    assert!(matches!(result, Err(PeerError::InfoHashMismatch)));
}

#[tokio::test]
async fn test_merge_bitfield_counts_new_pieces_once() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let (peer, _reader, _remote) = duplex_peer(&ctx, addr(1));

    assert_eq!(peer.missing_piece_count(), 4);
    assert_eq!(peer.merge_bitfield(&[0b1010_0000]), vec![0, 2]);
    assert_eq!(peer.merge_bitfield(&[0b1110_0000]), vec![1]);
    assert_eq!(peer.missing_piece_count(), 1);

    assert!(peer.mark_have(3));
    assert!(!peer.mark_have(3));
    assert!(!peer.mark_have(4));
    assert_eq!(peer.missing_piece_count(), 0);
    assert!(peer.remote_bitfield().is_complete());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let (peer, _reader, _remote) = duplex_peer(&ctx, addr(1));

    assert!(peer.is_active());
    assert!(peer.close());
    assert!(!peer.close());
    assert!(peer.is_closed());
    assert_eq!(peer.state(), PeerState::Closed);
    assert!(peer.token().is_cancelled());
    assert!(matches!(
        peer.send_keepalive().await,
        Err(PeerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_send_updates_flags_and_writes_frames() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let (peer, _reader, remote) = duplex_peer(&ctx, addr(1));
    let (mut remote_reader, _remote_writer) = remote_frames(remote);

    peer.send_interested().await.unwrap();
    peer.send_unchoke().await.unwrap();
    peer.send_request(BlockRequest::new(2, 0, 16384)).await.unwrap();

    let choking = peer.choking();
    assert!(choking.am_interested);
    assert!(!choking.am_choking);

    assert_eq!(remote_reader.read_message().await.unwrap(), Message::Interested);
    assert_eq!(remote_reader.read_message().await.unwrap(), Message::Unchoke);
    assert_eq!(
        remote_reader.read_message().await.unwrap(),
        Message::Request {
            index: 2,
            begin: 0,
            length: 16384,
        }
    );

    assert!(peer.record_block(2, 0, 16384).is_some());
    assert!(peer.record_block(2, 0, 16384).is_none());
    assert_eq!(peer.bytes_downloaded(), 32768);
}

#[tokio::test]
async fn test_forget_requests_stops_the_clock_for_one_piece() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let (peer, _reader, _remote) = duplex_peer(&ctx, addr(1));

    peer.send_request(BlockRequest::new(1, 0, 16384)).await.unwrap();
    peer.send_request(BlockRequest::new(1, 16384, 16384)).await.unwrap();
    peer.send_request(BlockRequest::new(3, 0, 16384)).await.unwrap();

    // Piece 1 was finished by another peer.
    peer.forget_requests(1);

    assert!(peer.record_block(1, 0, 16384).is_none());
    assert!(peer.record_block(1, 16384, 16384).is_none());
    assert!(peer.record_block(3, 0, 16384).is_some());
}

#[tokio::test]
async fn test_handle_have_and_bitfield() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let disk = DiskIo::start(CancellationToken::new());
    let (peer, _reader, _remote) = duplex_peer(&ctx, addr(1));

    handle_message(&ctx, &peer, &disk, Message::Bitfield(Bytes::from_static(&[0b1100_0000]))).unwrap();
    handle_message(&ctx, &peer, &disk, Message::Have { piece: 1 }).unwrap();
    handle_message(&ctx, &peer, &disk, Message::Have { piece: 3 }).unwrap();

    assert_eq!(ctx.piece_info(0).unwrap().peer_count, 1);
    assert_eq!(ctx.piece_info(1).unwrap().peer_count, 1);
    assert_eq!(ctx.piece_info(2).unwrap().peer_count, 0);
    assert_eq!(ctx.piece_info(3).unwrap().peer_count, 1);

    assert!(matches!(
        handle_message(&ctx, &peer, &disk, Message::Have { piece: 4 }),
        Err(PeerError::InvalidMessage(_))
    ));
    assert!(matches!(
        handle_message(&ctx, &peer, &disk, Message::Bitfield(Bytes::from_static(&[0, 0]))),
        Err(PeerError::InvalidMessage(_))
    ));
}

#[tokio::test]
async fn test_handle_choke_and_unknown() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let disk = DiskIo::start(CancellationToken::new());
    let (peer, _reader, _remote) = duplex_peer(&ctx, addr(1));

    handle_message(&ctx, &peer, &disk, Message::Unchoke).unwrap();
    handle_message(&ctx, &peer, &disk, Message::Interested).unwrap();
    assert!(!peer.is_choking_us());
    assert!(peer.choking().peer_interested);

    handle_message(&ctx, &peer, &disk, Message::Choke).unwrap();
    assert!(peer.is_choking_us());

    let unknown = Message::Unknown {
        id: 20,
        payload: Bytes::from_static(b"d1:md6:ut_pexi1eee"),
    };
    assert!(handle_message(&ctx, &peer, &disk, unknown).is_ok());
}

#[tokio::test]
async fn test_handle_request_validation() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let disk = DiskIo::start(CancellationToken::new());
    let (peer, _reader, _remote) = duplex_peer(&ctx, addr(1));

    let oversized = Message::Request {
        index: 0,
        begin: 0,
        length: 16385,
    };
    // Still choking the peer: requests are ignored, valid or not.
    assert!(handle_message(&ctx, &peer, &disk, oversized.clone()).is_ok());

    peer.send_unchoke().await.unwrap();
    assert!(matches!(
        handle_message(&ctx, &peer, &disk, oversized),
        Err(PeerError::InvalidMessage(_))
    ));
    assert!(matches!(
        handle_message(
            &ctx,
            &peer,
            &disk,
            Message::Request {
                index: 0,
                begin: 16000,
                length: 1000,
            }
        ),
        Err(PeerError::InvalidMessage(_))
    ));

    // Valid range for a piece we do not have.
    assert!(handle_message(
        &ctx,
        &peer,
        &disk,
        Message::Request {
            index: 1,
            begin: 0,
            length: 16384,
        }
    )
    .is_ok());
    assert!(!peer.is_closed());
}

#[tokio::test]
async fn test_request_served_from_disk() {
    let dir = TempDir::new().unwrap();
    let data = content(4 * 16384);
    let meta = single_file("four.bin", &data, 16384);
    let ctx = context(&meta, dir.path());
    crate::storage::create_local_structure(&ctx).await.unwrap();
    write_piece(&ctx, 2, &data[2 * 16384..3 * 16384]).await.unwrap();
    ctx.mark_piece_local(2, true).unwrap();

    let disk = DiskIo::start(CancellationToken::new());
    let (peer, _reader, remote) = duplex_peer(&ctx, addr(1));
    let (mut remote_reader, _remote_writer) = remote_frames(remote);

    peer.send_unchoke().await.unwrap();
    handle_message(
        &ctx,
        &peer,
        &disk,
        Message::Request {
            index: 2,
            begin: 1000,
            length: 500,
        },
    )
    .unwrap();

    assert_eq!(remote_reader.read_message().await.unwrap(), Message::Unchoke);
    let reply = tokio::time::timeout(Duration::from_secs(5), remote_reader.read_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        reply,
        Message::Piece {
            index: 2,
            begin: 1000,
            data: Bytes::copy_from_slice(&data[2 * 16384 + 1000..2 * 16384 + 1500]),
        }
    );

    // The uploaded counter is bumped right after the send completes.
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.bytes_uploaded() != 500 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(peer.bytes_uploaded(), 500);
}

#[tokio::test]
async fn test_session_evicts_peer_on_disconnect() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let disk = DiskIo::start(CancellationToken::new());
    let (peer, reader, remote) = duplex_peer(&ctx, addr(1));
    let (_remote_reader, mut remote_writer) = remote_frames(remote);

    assert!(ctx.admit_peer(peer.clone()));
    let session = spawn_session(ctx.clone(), peer.clone(), reader, disk);

    remote_writer
        .send(&Message::Bitfield(Bytes::from_static(&[0b1111_0000])))
        .await
        .unwrap();
    remote_writer.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .unwrap()
        .unwrap();

    assert!(peer.is_closed());
    assert_eq!(ctx.swarm_size(), 0);
    assert_eq!(ctx.dead_peer_count(), 1);
    for piece in 0..4 {
        assert_eq!(ctx.piece_info(piece).unwrap().peer_count, 0);
    }
}

#[tokio::test]
async fn test_session_closes_on_protocol_violation() {
    let dir = TempDir::new().unwrap();
    let meta = single_file("four.bin", &content(4 * 16384), 16384);
    let ctx = context(&meta, dir.path());
    let disk = DiskIo::start(CancellationToken::new());
    let (peer, reader, remote) = duplex_peer(&ctx, addr(1));
    let (_remote_reader, mut remote_writer) = remote_frames(remote);

    assert!(ctx.admit_peer(peer.clone()));
    let session = spawn_session(ctx.clone(), peer.clone(), reader, disk);

    remote_writer.send(&Message::Have { piece: 99 }).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .unwrap()
        .unwrap();
    assert!(peer.is_closed());
    assert_eq!(ctx.swarm_size(), 0);
}
