//! Disk storage.
//!
//! Pieces live in the virtual concatenation of the torrent's files; a piece
//! may span several files. [`file_spans`] maps byte ranges onto files, the
//! `layout` functions prepare the files and scan what is already on disk,
//! and [`DiskIo`] runs the background writer and request server.

mod disk_io;
mod error;
mod file;
mod layout;

pub use disk_io::{read_piece, write_piece, DiskIo, ReadRequest, WriteRequest};
pub use error::StorageError;
pub use file::{file_spans, validate_path, FileEntry, FileSpan};
pub use layout::{create_local_structure, create_torrent_bitfield, fully_downloaded_bitfield};

#[cfg(test)]
mod tests;
