//! Tracker announce protocol (BEP-3 HTTP, BEP-15 UDP)
//!
//! [`Tracker`] drives periodic announces for one torrent over an
//! [`Announcer`] and feeds the peers it learns into the swarm queue.

mod announcer;
mod error;
mod http;
mod response;
mod udp;

pub use announcer::{
    AnnounceParams, Announcer, Tracker, TrackerCallback, TrackerReport, TrackerStatus,
};
pub use error::TrackerError;
pub use http::HttpAnnouncer;
pub use response::{
    exclude_local, parse_compact_peers, parse_http_response, AnnounceRequest, AnnounceResponse,
    TrackerEvent,
};
pub use udp::{decode_announce, decode_connect, encode_announce, encode_connect, UdpAnnouncer};
