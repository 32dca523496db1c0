use super::error::TrackerError;
use super::response::{exclude_local, parse_compact_peers, AnnounceRequest, AnnounceResponse};
use crate::constants::{UDP_MAX_RETRIES, UDP_TIMEOUT};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng as _;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

pub const PROTOCOL_ID: u64 = 0x41727101980;
pub const ACTION_CONNECT: u32 = 0;
pub const ACTION_ANNOUNCE: u32 = 1;
pub const ACTION_ERROR: u32 = 3;
pub const ANNOUNCE_PACKET_LEN: usize = 100;

/// BEP-15 announcer.
///
/// The socket and connection id are created on first use. The connection
/// id is then reused for every later announce; it only gets dropped when
/// an announce fails, so the next attempt reconnects.
pub struct UdpAnnouncer {
    url: String,
    host: String,
    state: Mutex<UdpState>,
}

#[derive(Default)]
struct UdpState {
    socket: Option<UdpSocket>,
    connection_id: Option<u64>,
}

impl UdpAnnouncer {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        let host = parse_udp_url(url)?;
        Ok(Self {
            url: url.to_string(),
            host,
            state: Mutex::new(UdpState::default()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
        local_ip: Option<IpAddr>,
    ) -> Result<AnnounceResponse, TrackerError> {
        let mut state = self.state.lock().await;
        let result = self.announce_locked(&mut state, request, local_ip).await;
        if result.is_err() {
            state.connection_id = None;
        }
        result
    }

    async fn announce_locked(
        &self,
        state: &mut UdpState,
        request: &AnnounceRequest,
        local_ip: Option<IpAddr>,
    ) -> Result<AnnounceResponse, TrackerError> {
        if state.socket.is_none() {
            let addr = self.resolve().await?;
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(addr).await?;
            state.socket = Some(socket);
        }
        let Some(socket) = state.socket.as_ref() else {
            return Err(TrackerError::InvalidResponse("socket unavailable".into()));
        };

        let connection_id = match state.connection_id {
            Some(id) => id,
            None => {
                let transaction_id: u32 = rand::rng().random();
                let response =
                    send_and_receive(socket, &encode_connect(transaction_id), 16).await?;
                let id = decode_connect(&response, transaction_id)?;
                debug!("udp tracker {} connected", self.url);
                state.connection_id = Some(id);
                id
            }
        };

        let transaction_id: u32 = rand::rng().random();
        let packet = encode_announce(connection_id, transaction_id, request);
        let response = send_and_receive(socket, &packet, 8).await?;
        decode_announce(&response, transaction_id, local_ip)
    }

    async fn resolve(&self) -> Result<SocketAddr, TrackerError> {
        tokio::net::lookup_host(&self.host)
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| TrackerError::InvalidUrl(self.url.clone()))
    }
}

/// Sends `request` and waits for a reply, resending up to
/// [`UDP_MAX_RETRIES`] times on timeout. The wait doubles with every attempt.
async fn send_and_receive(
    socket: &UdpSocket,
    request: &[u8],
    min_response_size: usize,
) -> Result<Bytes, TrackerError> {
    let mut buf = vec![0u8; 2048];

    for attempt in 0..=UDP_MAX_RETRIES {
        socket.send(request).await?;

        match timeout(UDP_TIMEOUT * (1 << attempt), socket.recv(&mut buf)).await {
            Ok(Ok(n)) if n >= min_response_size => {
                return Ok(Bytes::copy_from_slice(&buf[..n]));
            }
            Ok(Ok(_)) => {
                return Err(TrackerError::InvalidResponse("response too short".into()));
            }
            Ok(Err(e)) => return Err(TrackerError::Io(e)),
            Err(_) => {
                trace!("udp tracker attempt {} timed out", attempt + 1);
                continue;
            }
        }
    }

    Err(TrackerError::Timeout)
}

pub fn encode_connect(transaction_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u64(PROTOCOL_ID);
    buf.put_u32(ACTION_CONNECT);
    buf.put_u32(transaction_id);
    buf.freeze()
}

pub fn decode_connect(mut data: &[u8], transaction_id: u32) -> Result<u64, TrackerError> {
    if data.len() < 16 {
        return Err(TrackerError::InvalidResponse("connect response too short".into()));
    }
    let action = data.get_u32();
    let tid = data.get_u32();
    if action != ACTION_CONNECT || tid != transaction_id {
        return Err(TrackerError::InvalidResponse(
            "connect response mismatch".into(),
        ));
    }
    Ok(data.get_u64())
}

/// Builds the 100-byte announce packet. `ip` and `key` are sent as zero.
pub fn encode_announce(connection_id: u64, transaction_id: u32, request: &AnnounceRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(ANNOUNCE_PACKET_LEN);
    buf.put_u64(connection_id);
    buf.put_u32(ACTION_ANNOUNCE);
    buf.put_u32(transaction_id);
    buf.put_slice(request.info_hash.as_bytes());
    buf.put_slice(request.peer_id.as_bytes());
    buf.put_u64(request.downloaded);
    buf.put_u64(request.left);
    buf.put_u64(request.uploaded);
    buf.put_u32(request.event.as_udp_id());
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(request.num_want);
    buf.put_u16(request.port);
    buf.put_u16(0);
    buf.freeze()
}

/// Parses an announce reply. An error action becomes
/// [`TrackerError::Failure`]; a wrong transaction id is rejected as stale.
pub fn decode_announce(
    mut data: &[u8],
    transaction_id: u32,
    local_ip: Option<IpAddr>,
) -> Result<AnnounceResponse, TrackerError> {
    if data.len() < 8 {
        return Err(TrackerError::InvalidResponse("announce response too short".into()));
    }
    let action = data.get_u32();
    let tid = data.get_u32();

    if tid != transaction_id {
        return Err(TrackerError::InvalidResponse("stale transaction id".into()));
    }
    if action == ACTION_ERROR {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(data).into_owned(),
        ));
    }
    if action != ACTION_ANNOUNCE || data.len() < 12 {
        return Err(TrackerError::InvalidResponse(
            "announce response mismatch".into(),
        ));
    }

    let interval = data.get_u32();
    let leechers = data.get_u32();
    let seeders = data.get_u32();

    let mut peers = parse_compact_peers(data);
    exclude_local(&mut peers, local_ip);

    Ok(AnnounceResponse {
        interval,
        complete: Some(seeders),
        incomplete: Some(leechers),
        peers,
        ..Default::default()
    })
}

/// Extracts `host:port` from `udp://host:port[/path]`.
fn parse_udp_url(url: &str) -> Result<String, TrackerError> {
    let rest = url
        .strip_prefix("udp://")
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
    let host = rest.split('/').next().unwrap_or(rest);

    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(host.to_string())
        }
        _ => Err(TrackerError::InvalidUrl(url.to_string())),
    }
}
