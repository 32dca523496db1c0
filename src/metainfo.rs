//! Torrent metainfo ([BEP-3]).
//!
//! [`Metainfo`] is the contract the rest of the crate consumes: the info
//! hash, the announce URL, the piece length, the concatenated SHA-1 piece
//! hashes and the file layout with cumulative offsets into the virtual
//! concatenation of all files.
//!
//! ```no_run
//! use rswarm::metainfo::Metainfo;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("example.torrent")?;
//! let torrent = Metainfo::from_bytes(&data)?;
//!
//! println!("{} ({} pieces)", torrent.name, torrent.piece_count());
//! for file in &torrent.files {
//!     println!("  {} @ {} ({} bytes)", file.path.display(), file.offset, file.length);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::Metainfo;

#[cfg(test)]
mod tests;
