use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, Value};
use crate::storage::FileEntry;
use bytes::Bytes;
use std::path::PathBuf;

/// A parsed (or assembled) v1 torrent.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// SHA-1 of the bencoded `info` dictionary.
    pub info_hash: InfoHash,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Suggested file or directory name.
    pub name: String,
    /// Bytes per piece; only the last piece may be shorter.
    pub piece_length: u32,
    /// Concatenated 20-byte SHA-1 hashes, one per piece.
    pub pieces: Bytes,
    /// Files in the order they appear in the virtual concatenation.
    pub files: Vec<FileEntry>,
    pub total_length: u64,
}

impl Metainfo {
    /// Parses a `.torrent` file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = decode(data)?;
        if root.as_dict().is_none() {
            return Err(MetainfoError::InvalidField("root"));
        }

        let info = root.get(b"info").ok_or(MetainfoError::MissingField("info"))?;
        if info.as_dict().is_none() {
            return Err(MetainfoError::InvalidField("info"));
        }

        let info_hash = InfoHash::from_info_bytes(&encode(info));
        let announce = root.get_str(b"announce").map(String::from);

        let name = info
            .get_str(b"name")
            .ok_or(MetainfoError::MissingField("name"))?
            .to_string();

        let piece_length = info
            .get_int(b"piece length")
            .ok_or(MetainfoError::MissingField("piece length"))?;
        let piece_length = u32::try_from(piece_length)
            .ok()
            .filter(|&len| len > 0)
            .ok_or(MetainfoError::InvalidField("piece length"))?;

        let pieces = info
            .get_bytes(b"pieces")
            .ok_or(MetainfoError::MissingField("pieces"))?
            .clone();

        let files = parse_files(info, &name)?;

        Self::assemble(info_hash, announce, name, piece_length, pieces, files)
    }

    /// Builds metadata from already-known parts. The info hash is computed
    /// from the canonical `info` dictionary these parts describe.
    pub fn new(
        name: &str,
        announce: Option<&str>,
        piece_length: u32,
        pieces: Bytes,
        files: Vec<(PathBuf, u64)>,
    ) -> Result<Self, MetainfoError> {
        if piece_length == 0 {
            return Err(MetainfoError::InvalidField("piece length"));
        }

        let mut offset = 0u64;
        let files: Vec<FileEntry> = files
            .into_iter()
            .map(|(path, length)| {
                let entry = FileEntry::new(path, length, offset);
                offset += length;
                entry
            })
            .collect();

        let info = info_dict(name, piece_length, &pieces, &files);
        let info_hash = InfoHash::from_info_bytes(&encode(&info));

        Self::assemble(
            info_hash,
            announce.map(String::from),
            name.to_string(),
            piece_length,
            pieces,
            files,
        )
    }

    fn assemble(
        info_hash: InfoHash,
        announce: Option<String>,
        name: String,
        piece_length: u32,
        pieces: Bytes,
        files: Vec<FileEntry>,
    ) -> Result<Self, MetainfoError> {
        if pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        let total_length: u64 = files.iter().map(|f| f.length).sum();
        let expected_pieces = total_length.div_ceil(piece_length as u64);
        if expected_pieces != (pieces.len() / 20) as u64 {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        Ok(Self {
            info_hash,
            announce,
            name,
            piece_length,
            pieces,
            files,
            total_length,
        })
    }

    pub fn piece_count(&self) -> u32 {
        (self.pieces.len() / 20) as u32
    }

    /// Returns the expected SHA-1 for `index`.
    pub fn piece_hash(&self, index: u32) -> Option<&[u8]> {
        let start = index as usize * 20;
        self.pieces.get(start..start + 20)
    }

    /// Actual byte length of `index`; the last piece may be short.
    pub fn piece_byte_length(&self, index: u32) -> Option<u32> {
        if index >= self.piece_count() {
            return None;
        }
        let start = index as u64 * self.piece_length as u64;
        let len = (self.total_length - start).min(self.piece_length as u64);
        Some(len as u32)
    }
}

fn parse_files(info: &Value, name: &str) -> Result<Vec<FileEntry>, MetainfoError> {
    if let Some(length) = info.get_int(b"length") {
        let length = u64::try_from(length).map_err(|_| MetainfoError::InvalidField("length"))?;
        return Ok(vec![FileEntry::new(PathBuf::from(name), length, 0)]);
    }

    let list = info
        .get_list(b"files")
        .ok_or(MetainfoError::MissingField("length or files"))?;

    let mut files = Vec::with_capacity(list.len());
    let mut offset = 0u64;

    for file in list {
        let length = file
            .get_int(b"length")
            .ok_or(MetainfoError::MissingField("file length"))?;
        let length =
            u64::try_from(length).map_err(|_| MetainfoError::InvalidField("file length"))?;

        let segments = file
            .get_list(b"path")
            .ok_or(MetainfoError::MissingField("file path"))?;

        let mut path = PathBuf::from(name);
        for segment in segments {
            path.push(
                segment
                    .as_str()
                    .ok_or(MetainfoError::InvalidField("file path"))?,
            );
        }

        files.push(FileEntry::new(path, length, offset));
        offset += length;
    }

    Ok(files)
}

fn info_dict(name: &str, piece_length: u32, pieces: &Bytes, files: &[FileEntry]) -> Value {
    let mut info = match files {
        [single] if single.path == PathBuf::from(name) => Value::from([
            ("length", Value::Integer(single.length as i64)),
        ]),
        _ => {
            let list = files
                .iter()
                .map(|f| {
                    let segments = f
                        .path
                        .strip_prefix(name)
                        .unwrap_or(&f.path)
                        .iter()
                        .map(|s| Value::string(&s.to_string_lossy()))
                        .collect::<Vec<_>>();
                    Value::from([
                        ("length", Value::Integer(f.length as i64)),
                        ("path", Value::List(segments)),
                    ])
                })
                .collect::<Vec<_>>();
            Value::from([("files", Value::List(list))])
        }
    };

    if let Value::Dict(ref mut dict) = info {
        dict.insert(Bytes::from_static(b"name"), Value::string(name));
        dict.insert(
            Bytes::from_static(b"piece length"),
            Value::Integer(piece_length as i64),
        );
        dict.insert(Bytes::from_static(b"pieces"), Value::Bytes(pieces.clone()));
    }
    info
}
