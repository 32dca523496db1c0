use super::error::PeerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    /// Returns `None` for ids outside the base protocol.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            _ => return None,
        })
    }
}

/// The fixed 68-byte handshake: `<19><"BitTorrent protocol"><8 reserved>
/// <info_hash><peer_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    /// No extension bits are advertised.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            info_hash,
            peer_id,
            reserved: [0u8; 8],
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake("too short"));
        }

        if data[0] as usize != PROTOCOL.len() || &data[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake("unknown protocol"));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A peer wire message. Every message except the handshake travels as
/// `<u32 length><payload>` where the length excludes its own four bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    /// A message id outside 0-8; kept so the reader can log and skip it.
    Unknown { id: u8, payload: Bytes },
}

impl Message {
    /// Returns the payload length (the value of the length prefix).
    pub fn payload_len(&self) -> usize {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield(bits) => 1 + bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { data, .. } => 9 + data.len(),
            Message::Unknown { payload, .. } => 1 + payload.len(),
        }
    }

    /// Encodes the full frame, length prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.payload_len());
        buf.put_u32(self.payload_len() as u32);

        match self {
            Message::KeepAlive => {}
            Message::Choke => buf.put_u8(MessageId::Choke as u8),
            Message::Unchoke => buf.put_u8(MessageId::Unchoke as u8),
            Message::Interested => buf.put_u8(MessageId::Interested as u8),
            Message::NotInterested => buf.put_u8(MessageId::NotInterested as u8),
            Message::Have { piece } => {
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Unknown { id, payload } => {
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
        }

        buf.freeze()
    }

    /// Decodes a full frame, length prefix included.
    pub fn decode(mut frame: Bytes) -> Result<Self, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = frame.get_u32() as usize;
        if frame.remaining() != length {
            return Err(PeerError::InvalidMessage(format!(
                "length prefix {} but {} bytes follow",
                length,
                frame.remaining()
            )));
        }

        Self::decode_payload(frame)
    }

    /// Decodes a payload whose length prefix has already been consumed.
    /// An empty payload is a keep-alive.
    pub fn decode_payload(mut payload: Bytes) -> Result<Self, PeerError> {
        if payload.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let raw_id = payload.get_u8();
        let Some(id) = MessageId::from_u8(raw_id) else {
            return Ok(Message::Unknown {
                id: raw_id,
                payload,
            });
        };

        let need = |len: usize, name: &str| -> Result<(), PeerError> {
            if payload.remaining() < len {
                Err(PeerError::InvalidMessage(format!("{} too short", name)))
            } else {
                Ok(())
            }
        };

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                need(4, "have")?;
                Ok(Message::Have {
                    piece: payload.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(payload)),
            MessageId::Request => {
                need(12, "request")?;
                Ok(Message::Request {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
            MessageId::Piece => {
                need(8, "piece")?;
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    data: payload,
                })
            }
            MessageId::Cancel => {
                need(12, "cancel")?;
                Ok(Message::Cancel {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
        }
    }
}
