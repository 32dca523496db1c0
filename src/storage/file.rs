use super::error::StorageError;
use std::path::{Component, Path, PathBuf};

/// One file of the torrent, placed at `offset` in the virtual
/// concatenation of all files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    pub offset: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
        }
    }

    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.length
    }
}

/// The part of a byte range that falls inside one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

/// Maps `[start, start + length)` of the virtual concatenation onto the
/// files it intersects, in order. Zero-length files are skipped.
pub fn file_spans(files: &[FileEntry], start: u64, length: u64) -> Vec<FileSpan> {
    let mut spans = Vec::new();
    let mut remaining = length;
    let mut current = start;

    for (file_index, file) in files.iter().enumerate() {
        if remaining == 0 {
            break;
        }

        let range = file.byte_range();
        if range.contains(&current) {
            let take = remaining.min(range.end - current);
            spans.push(FileSpan {
                file_index,
                file_offset: current - file.offset,
                length: take,
            });
            current += take;
            remaining -= take;
        }
    }

    spans
}

/// Rejects paths that would escape the download directory.
pub fn validate_path(path: &Path) -> Result<(), StorageError> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}
