use super::*;
use crate::test_util::{content, context, multi_file, single_file};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn entries(lengths: &[u64]) -> Vec<FileEntry> {
    let mut offset = 0;
    lengths
        .iter()
        .enumerate()
        .map(|(i, &length)| {
            let entry = FileEntry::new(PathBuf::from(format!("f{}", i)), length, offset);
            offset += length;
            entry
        })
        .collect()
}

#[test]
fn test_file_spans_single_file() {
    let files = entries(&[100]);
    let spans = file_spans(&files, 10, 20);
    assert_eq!(
        spans,
        vec![FileSpan {
            file_index: 0,
            file_offset: 10,
            length: 20,
        }]
    );
}

#[test]
fn test_file_spans_across_files() {
    let files = entries(&[10, 0, 5, 20]);
    let spans = file_spans(&files, 8, 10);

    assert_eq!(
        spans,
        vec![
            FileSpan {
                file_index: 0,
                file_offset: 8,
                length: 2,
            },
            FileSpan {
                file_index: 2,
                file_offset: 0,
                length: 5,
            },
            FileSpan {
                file_index: 3,
                file_offset: 0,
                length: 3,
            },
        ]
    );
}

#[test]
fn test_file_spans_past_end() {
    let files = entries(&[10]);
    assert!(file_spans(&files, 10, 5).is_empty());
    assert_eq!(file_spans(&files, 5, 50)[0].length, 5);
}

#[test]
fn test_validate_path() {
    assert!(validate_path(Path::new("dir/file.bin")).is_ok());
    assert!(matches!(
        validate_path(Path::new("dir/../../etc/passwd")),
        Err(StorageError::PathTraversal(_))
    ));
    assert!(matches!(
        validate_path(Path::new("/etc/passwd")),
        Err(StorageError::PathTraversal(_))
    ));
}

#[tokio::test]
async fn test_create_local_structure() {
    let temp = TempDir::new().unwrap();
    let data = content(50000);
    let meta = multi_file("album", &data, 16384, &[30000, 20000]);
    let ctx = context(&meta, temp.path());

    create_local_structure(&ctx).await.unwrap();

    let first = tokio::fs::metadata(temp.path().join("album/part0.bin"))
        .await
        .unwrap();
    let second = tokio::fs::metadata(temp.path().join("album/part1.bin"))
        .await
        .unwrap();
    assert_eq!(first.len(), 30000);
    assert_eq!(second.len(), 20000);
}

#[tokio::test]
async fn test_create_local_structure_keeps_existing_files() {
    let temp = TempDir::new().unwrap();
    let data = content(20000);
    let meta = single_file("keep.bin", &data, 16384);
    let ctx = context(&meta, temp.path());

    tokio::fs::write(temp.path().join("keep.bin"), b"existing")
        .await
        .unwrap();
    create_local_structure(&ctx).await.unwrap();

    let kept = tokio::fs::read(temp.path().join("keep.bin")).await.unwrap();
    assert_eq!(kept, b"existing");
}

#[tokio::test]
async fn test_write_read_piece_across_files() {
    let temp = TempDir::new().unwrap();
    let data = content(50000);
    let meta = multi_file("album", &data, 16384, &[20000, 10000, 20000]);
    let ctx = context(&meta, temp.path());
    create_local_structure(&ctx).await.unwrap();

    for piece in 0..ctx.num_pieces() {
        let start = piece as usize * 16384;
        let end = (start + 16384).min(data.len());
        write_piece(&ctx, piece, &data[start..end]).await.unwrap();
    }

    // Piece 1 covers bytes 16384..32768: the tail of part0, all of part1
    // and the head of part2.
    let piece = read_piece(&ctx, 1).await.unwrap();
    assert_eq!(&piece[..], &data[16384..32768]);

    let last = read_piece(&ctx, 3).await.unwrap();
    assert_eq!(last.len(), 50000 - 3 * 16384);

    let part1 = tokio::fs::read(temp.path().join("album/part1.bin"))
        .await
        .unwrap();
    assert_eq!(part1, &data[20000..30000]);
}

#[tokio::test]
async fn test_write_piece_rejects_bad_input() {
    let temp = TempDir::new().unwrap();
    let data = content(20000);
    let meta = single_file("short.bin", &data, 16384);
    let ctx = context(&meta, temp.path());
    create_local_structure(&ctx).await.unwrap();

    assert!(matches!(
        write_piece(&ctx, 1, &data[..16384]).await,
        Err(StorageError::InvalidPieceLength { piece: 1, .. })
    ));
    assert!(matches!(
        write_piece(&ctx, 2, &data[..10]).await,
        Err(StorageError::InvalidPieceIndex(2))
    ));
}

#[tokio::test]
async fn test_create_torrent_bitfield() {
    let temp = TempDir::new().unwrap();
    let data = content(5 * 16384);
    let meta = single_file("scan.bin", &data, 16384);
    let ctx = context(&meta, temp.path());

    let mut on_disk = data.clone();
    on_disk[2 * 16384 + 7] ^= 0xFF;
    tokio::fs::write(temp.path().join("scan.bin"), &on_disk)
        .await
        .unwrap();

    let local = create_torrent_bitfield(&ctx).await.unwrap();
    assert_eq!(local, 4);

    assert!(ctx.is_piece_local(0).unwrap());
    assert!(!ctx.is_piece_local(2).unwrap());
    assert!(ctx.is_piece_missing(2).unwrap());
    assert!(!ctx.is_piece_missing(4).unwrap());
    assert_eq!(ctx.missing_piece_count(), 1);
    assert_eq!(ctx.bytes_downloaded(), 4 * 16384);
    assert_eq!(ctx.bytes_left_to_download(), 16384);
}

#[tokio::test]
async fn test_create_torrent_bitfield_missing_files() {
    let temp = TempDir::new().unwrap();
    let data = content(3 * 16384);
    let meta = single_file("absent.bin", &data, 16384);
    let ctx = context(&meta, temp.path());

    assert_eq!(create_torrent_bitfield(&ctx).await.unwrap(), 0);
    assert_eq!(ctx.missing_piece_count(), 3);
    assert_eq!(ctx.bytes_downloaded(), 0);
}

#[test]
fn test_fully_downloaded_bitfield() {
    let temp = TempDir::new().unwrap();
    let data = content(40000);
    let meta = single_file("seed.bin", &data, 16384);
    let ctx = context(&meta, temp.path());

    fully_downloaded_bitfield(&ctx).unwrap();
    assert_eq!(ctx.missing_piece_count(), 0);
    assert!(ctx.local_bitfield().is_complete());
    assert_eq!(ctx.bytes_left_to_download(), 0);
}

#[tokio::test]
async fn test_disk_writer_reports_progress() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    let temp = TempDir::new().unwrap();
    let data = content(2 * 16384);
    let meta = single_file("progress.bin", &data, 16384);
    let ctx = context(&meta, temp.path());
    create_local_structure(&ctx).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    ctx.set_progress_callback(Some(Arc::new(move |progress: &crate::torrent::Progress| {
        assert_eq!(progress.bytes_to_download, 2 * 16384);
        seen.fetch_add(1, Ordering::SeqCst);
    })));

    let disk = DiskIo::start(CancellationToken::new());
    for piece in 0..2u32 {
        let start = piece as usize * 16384;
        disk.queue_write(WriteRequest {
            ctx: ctx.clone(),
            piece,
            data: bytes::Bytes::copy_from_slice(&data[start..start + 16384]),
        });
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), ctx.wait_download_finished())
        .await
        .unwrap();
    assert_eq!(ctx.bytes_downloaded(), 2 * 16384);

    // The callback for the last piece runs just after the counter update.
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        tokio::fs::read(temp.path().join("progress.bin")).await.unwrap(),
        data
    );
}

#[tokio::test]
async fn test_failed_write_puts_piece_back() {
    use tokio_util::sync::CancellationToken;

    let temp = TempDir::new().unwrap();
    let data = content(2 * 16384);
    let meta = single_file("lost.bin", &data, 16384);
    let ctx = context(&meta, &temp.path().join("absent"));

    // Both pieces verified and handed to the writer.
    for piece in 0..2 {
        ctx.mark_piece_local(piece, true).unwrap();
        ctx.mark_piece_missing(piece, false).unwrap();
    }
    let disk = DiskIo::start(CancellationToken::new());
    disk.queue_write(WriteRequest {
        ctx: ctx.clone(),
        piece: 0,
        data: bytes::Bytes::copy_from_slice(&data[..16384]),
    });

    tokio::time::timeout(std::time::Duration::from_secs(5), ctx.wait_download_settled())
        .await
        .unwrap();

    assert!(!ctx.is_piece_local(0).unwrap());
    assert!(ctx.is_piece_missing(0).unwrap());
    assert!(ctx.is_piece_local(1).unwrap());
    assert_eq!(ctx.missing_piece_count(), 1);
    assert_eq!(ctx.bytes_downloaded(), 0);
}
