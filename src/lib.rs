//! rswarm - a BitTorrent download and seeding engine
//!
//! The crate covers the core of a BitTorrent client: the peer wire
//! protocol, piece selection and assembly, disk I/O over multi-file
//! layouts, and HTTP/UDP tracker announces.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`metainfo`] - `.torrent` parsing and info hashes
//! - [`peer`] - BEP-3 peer wire protocol and per-peer state
//! - [`torrent`] - per-torrent state, piece selection and the assembler
//! - [`storage`] - file layout, startup verification and disk workers
//! - [`tracker`] - BEP-3/15 HTTP and UDP tracker announces
//! - [`agent`] - registry, swarm admission and the control surface
//!
//! # Example
//!
//! ```no_run
//! use rswarm::{Agent, AgentConfig, Metainfo};
//!
//! # async fn example() -> Result<(), rswarm::Error> {
//! let data = std::fs::read("example.torrent")?;
//! let metainfo = Metainfo::from_bytes(&data)?;
//!
//! let agent = Agent::new(AgentConfig::default().with_download_dir("downloads"));
//! agent.listen().await?;
//!
//! let info_hash = agent.add_torrent(&metainfo, false).await?;
//! agent.start_torrent(&info_hash).await?;
//!
//! let status = agent.torrent_status(&info_hash)?;
//! println!("{}: {} pieces missing", status.file_name, status.missing_piece_count);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod bencode;
pub mod constants;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod torrent;
pub mod tracker;

#[cfg(test)]
mod test_util;

pub use agent::{Agent, AgentConfig, TorrentSnapshot};
pub use bencode::{decode, encode, BencodeError, Value};
pub use error::{Error, Result, ValidationError};
pub use metainfo::{InfoHash, Metainfo, MetainfoError};
pub use peer::{Bitfield, BlockRequest, Handshake, Message, PeerError, PeerHandle, PeerId, PeerState};
pub use storage::{DiskIo, FileEntry, StorageError};
pub use torrent::{Assembler, Progress, TorrentContext, TorrentStatus};
pub use tracker::{AnnounceResponse, Tracker, TrackerError, TrackerEvent, TrackerReport, TrackerStatus};
