use super::*;
use crate::bencode::{encode, Value};
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::path::PathBuf;

fn single_file_torrent() -> (Vec<u8>, Value) {
    let info = Value::from([
        ("length", Value::Integer(40000)),
        ("name", Value::string("video.bin")),
        ("piece length", Value::Integer(16384)),
        ("pieces", Value::Bytes(Bytes::from(vec![7u8; 60]))),
    ]);
    let root = Value::from([
        ("announce", Value::string("http://tracker.example.com/announce")),
        ("info", info.clone()),
    ]);
    (encode(&root), info)
}

#[test]
fn test_parse_single_file() {
    let (data, info) = single_file_torrent();
    let torrent = Metainfo::from_bytes(&data).unwrap();

    assert_eq!(torrent.name, "video.bin");
    assert_eq!(
        torrent.announce.as_deref(),
        Some("http://tracker.example.com/announce")
    );
    assert_eq!(torrent.piece_length, 16384);
    assert_eq!(torrent.piece_count(), 3);
    assert_eq!(torrent.total_length, 40000);
    assert_eq!(torrent.files.len(), 1);
    assert_eq!(torrent.files[0].offset, 0);

    let expected: [u8; 20] = Sha1::digest(encode(&info)).into();
    assert_eq!(torrent.info_hash.0, expected);
}

#[test]
fn test_parse_multi_file_offsets() {
    let files = Value::List(vec![
        Value::from([
            ("length", Value::Integer(10000)),
            ("path", Value::List(vec![Value::string("a.txt")])),
        ]),
        Value::from([
            ("length", Value::Integer(5000)),
            (
                "path",
                Value::List(vec![Value::string("sub"), Value::string("b.txt")]),
            ),
        ]),
    ]);
    let info = Value::from([
        ("files", files),
        ("name", Value::string("album")),
        ("piece length", Value::Integer(8192)),
        ("pieces", Value::Bytes(Bytes::from(vec![0u8; 40]))),
    ]);
    let root = Value::from([("info", info)]);

    let torrent = Metainfo::from_bytes(&encode(&root)).unwrap();
    assert!(torrent.announce.is_none());
    assert_eq!(torrent.files.len(), 2);
    assert_eq!(torrent.files[0].path, PathBuf::from("album/a.txt"));
    assert_eq!(torrent.files[1].path, PathBuf::from("album/sub/b.txt"));
    assert_eq!(torrent.files[1].offset, 10000);
    assert_eq!(torrent.total_length, 15000);
}

#[test]
fn test_pieces_must_match_length() {
    let info = Value::from([
        ("length", Value::Integer(40000)),
        ("name", Value::string("x")),
        ("piece length", Value::Integer(16384)),
        ("pieces", Value::Bytes(Bytes::from(vec![0u8; 41]))),
    ]);
    let data = encode(&Value::from([("info", info)]));
    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::InvalidField("pieces"))
    ));
}

#[test]
fn test_missing_info() {
    let data = encode(&Value::from([("announce", Value::string("x"))]));
    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::MissingField("info"))
    ));
}

#[test]
fn test_new_matches_parsed_hash() {
    let (data, _) = single_file_torrent();
    let parsed = Metainfo::from_bytes(&data).unwrap();

    let built = Metainfo::new(
        "video.bin",
        Some("http://tracker.example.com/announce"),
        16384,
        Bytes::from(vec![7u8; 60]),
        vec![(PathBuf::from("video.bin"), 40000)],
    )
    .unwrap();

    assert_eq!(built.info_hash, parsed.info_hash);
}

#[test]
fn test_piece_byte_length() {
    let torrent = Metainfo::new(
        "f",
        None,
        16384,
        Bytes::from(vec![0u8; 60]),
        vec![(PathBuf::from("f"), 40000)],
    )
    .unwrap();

    assert_eq!(torrent.piece_byte_length(0), Some(16384));
    assert_eq!(torrent.piece_byte_length(2), Some(40000 - 2 * 16384));
    assert_eq!(torrent.piece_byte_length(3), None);
    assert!(torrent.piece_hash(2).is_some());
    assert!(torrent.piece_hash(3).is_none());
}

#[test]
fn test_info_hash_hex() {
    let hash = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap();
    assert_eq!(hash.to_hex(), "c12fe1c06bba254a9dc9f519b335aa7c1367a88a");
    assert!(InfoHash::from_hex("abcd").is_err());
    assert!(InfoHash::from_bytes(&[0u8; 19]).is_err());
}
