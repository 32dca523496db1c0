use super::disk_io::read_piece;
use super::error::StorageError;
use super::file::validate_path;
use crate::torrent::TorrentContext;
use sha1::{Digest, Sha1};
use tokio::fs::OpenOptions;
use tracing::{debug, info};

/// Creates every declared file that is absent and sizes it to its declared
/// length so pieces can later be written at any offset.
pub async fn create_local_structure(ctx: &TorrentContext) -> Result<(), StorageError> {
    for file in ctx.files() {
        validate_path(&file.path)?;

        let path = ctx.download_dir().join(&file.path);
        if tokio::fs::try_exists(&path).await? {
            continue;
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        f.set_len(file.length).await?;

        debug!("created {} ({} bytes)", path.display(), file.length);
    }

    Ok(())
}

/// Hashes every piece already on disk and marks the ones that verify as
/// local. Pieces that fail to read or verify stay missing. Returns the
/// number of local pieces.
pub async fn create_torrent_bitfield(ctx: &TorrentContext) -> Result<u32, StorageError> {
    let mut local = 0;

    for piece in 0..ctx.num_pieces() {
        let data = match read_piece(ctx, piece).await {
            Ok(data) => data,
            Err(StorageError::Io(e)) => {
                debug!("piece {} unreadable: {}", piece, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let expected = ctx
            .piece_hash(piece)
            .map_err(|_| StorageError::InvalidPieceIndex(piece))?;
        let expected: [u8; 20] = expected
            .try_into()
            .map_err(|_| StorageError::InvalidPieceIndex(piece))?;

        let len = data.len() as u64;
        let actual =
            tokio::task::spawn_blocking(move || -> [u8; 20] { Sha1::digest(&data).into() })
                .await?;

        if actual == expected {
            mark_local(ctx, piece, len)?;
            local += 1;
        }
    }

    info!(
        "{}: {} of {} pieces verified on disk",
        ctx.name(),
        local,
        ctx.num_pieces()
    );
    Ok(local)
}

/// Marks every piece local without touching the disk.
pub fn fully_downloaded_bitfield(ctx: &TorrentContext) -> Result<(), StorageError> {
    for piece in 0..ctx.num_pieces() {
        let len = ctx
            .piece_byte_length(piece)
            .map_err(|_| StorageError::InvalidPieceIndex(piece))?;
        mark_local(ctx, piece, len as u64)?;
    }
    Ok(())
}

fn mark_local(ctx: &TorrentContext, piece: u32, len: u64) -> Result<(), StorageError> {
    ctx.mark_piece_local(piece, true)
        .and_then(|()| ctx.mark_piece_missing(piece, false))
        .map_err(|_| StorageError::InvalidPieceIndex(piece))?;
    ctx.add_downloaded(len);
    Ok(())
}
