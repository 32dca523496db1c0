use super::error::TrackerError;
use crate::bencode::{decode, Value};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    /// Query-string value; empty for `None`, which is omitted from the URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// What we tell the tracker on every announce.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
    pub num_want: u32,
    pub key: u32,
    pub tracker_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds until the next regular announce.
    pub interval: u32,
    pub min_interval: Option<u32>,
    pub tracker_id: Option<String>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
    pub warning: Option<String>,
}

/// Parses 6-byte compact IPv4 peer records; a trailing partial record is
/// ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}

/// Drops every peer whose address is our own announcing address.
pub fn exclude_local(peers: &mut Vec<SocketAddr>, local_ip: Option<IpAddr>) {
    if let Some(local) = local_ip {
        peers.retain(|p| p.ip() != local);
    }
}

/// Parses a bencoded HTTP announce response.
///
/// A non-empty `failure reason` short-circuits into
/// [`TrackerError::Failure`] and the rest of the dictionary is ignored.
pub fn parse_http_response(
    body: &[u8],
    local_ip: Option<IpAddr>,
) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body)?;
    if value.as_dict().is_none() {
        return Err(TrackerError::InvalidResponse("expected dict".into()));
    }

    if let Some(reason) = value.get_bytes(b"failure reason") {
        if !reason.is_empty() {
            return Err(TrackerError::Failure(
                String::from_utf8_lossy(reason).into_owned(),
            ));
        }
    }

    let interval = value
        .get_int(b"interval")
        .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?;

    let mut response = AnnounceResponse {
        interval: clamp_u32(interval),
        min_interval: value.get_int(b"min interval").map(clamp_u32),
        tracker_id: value.get_str(b"tracker id").map(String::from),
        complete: value.get_int(b"complete").map(clamp_u32),
        incomplete: value.get_int(b"incomplete").map(clamp_u32),
        peers: Vec::new(),
        warning: value.get_str(b"warning message").map(String::from),
    };

    match value.get(b"peers") {
        Some(Value::Bytes(compact)) => response.peers = parse_compact_peers(compact),
        Some(Value::List(list)) => {
            response.peers = list.iter().filter_map(parse_peer_dict).collect();
        }
        Some(_) => return Err(TrackerError::InvalidResponse("malformed peers".into())),
        None => {}
    }

    exclude_local(&mut response.peers, local_ip);
    Ok(response)
}

/// One entry of a non-compact peer list. The ip may carry a
/// `family:host` prefix, in which case the last segment is the address;
/// the port may be an integer or a decimal string.
fn parse_peer_dict(peer: &Value) -> Option<SocketAddr> {
    let ip = peer.get_str(b"ip")?;
    let host = ip.rsplit(':').next()?;
    let ip: Ipv4Addr = host.trim().parse().ok()?;

    let port = match peer.get(b"port")? {
        Value::Integer(port) => u16::try_from(*port).ok()?,
        Value::Bytes(port) => std::str::from_utf8(port).ok()?.trim().parse().ok()?,
        _ => return None,
    };

    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}
