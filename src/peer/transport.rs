use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::{MAX_MESSAGE_LEN, NOMINAL_MESSAGE_LEN, WRITE_TIMEOUT};
use bytes::BytesMut;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of a peer connection.
///
/// The buffer starts at the size of one full block message and grows when a
/// larger message (usually a bitfield) arrives.
pub struct FrameReader {
    reader: BoxedReader,
    buf: BytesMut,
}

impl FrameReader {
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(NOMINAL_MESSAGE_LEN),
        }
    }

    pub async fn read_message(&mut self) -> Result<Message, PeerError> {
        let mut prefix = [0u8; 4];
        self.reader
            .read_exact(&mut prefix)
            .await
            .map_err(closed_on_eof)?;

        let length = u32::from_be_bytes(prefix) as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if length > MAX_MESSAGE_LEN {
            return Err(PeerError::MessageTooLarge(length));
        }
        if length > self.buf.capacity() {
            trace!("growing read buffer to {} bytes", length);
        }

        self.buf.clear();
        self.buf.resize(length, 0);
        self.reader
            .read_exact(&mut self.buf[..])
            .await
            .map_err(closed_on_eof)?;

        Message::decode_payload(self.buf.split().freeze())
    }
}

/// Write half of a peer connection. Owned by a `PeerHandle` behind its
/// write mutex so whole frames never interleave.
pub struct FrameWriter {
    writer: BoxedWriter,
}

impl FrameWriter {
    pub fn new(writer: BoxedWriter) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        timeout(WRITE_TIMEOUT, self.writer.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

pub async fn write_handshake<W>(writer: &mut W, handshake: &Handshake) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&handshake.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_handshake<R>(reader: &mut R) -> Result<Handshake, PeerError>
where
    R: AsyncRead + Unpin,
{
    let mut data = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut data).await.map_err(closed_on_eof)?;
    Handshake::decode(&data)
}

fn closed_on_eof(err: std::io::Error) -> PeerError {
    if err.kind() == ErrorKind::UnexpectedEof {
        PeerError::ConnectionClosed
    } else {
        PeerError::Io(err)
    }
}
