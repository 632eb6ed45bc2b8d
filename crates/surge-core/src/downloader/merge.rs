//! Finalization: merge part files into the destination and clean up.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use super::Transfer;

/// Destination path rule: if `out_path` names an existing directory the file
/// goes inside it under the inferred name, otherwise `out_path` is the file.
pub(super) fn resolve_destination(out_path: &Path, filename: &str) -> PathBuf {
    if out_path.is_dir() {
        out_path.join(filename)
    } else {
        out_path.to_path_buf()
    }
}

/// Streams every part file into `dest` in byte order and removes each part as
/// it is consumed.
///
/// Before writing anything the segment ranges are checked to be complete,
/// pairwise contiguous, and an exact cover of `[0, total_size - 1]`; after
/// writing, the destination length must equal `total_size`. Either failure
/// aborts the merge with the destination left as-is for inspection.
pub(super) fn finalize(transfer: &Transfer, dest: &Path) -> Result<()> {
    let mut segments = transfer.store.snapshot();
    segments.sort_by_key(|s| s.start());

    let mut expected_offset = 0u64;
    for s in &segments {
        if !s.is_complete() {
            bail!(
                "segment {} has {} bytes remaining, refusing to merge",
                s.id(),
                s.remaining()
            );
        }
        if s.start() != expected_offset {
            bail!(
                "segment {} starts at byte {} but {} was expected (gap or overlap)",
                s.id(),
                s.start(),
                expected_offset
            );
        }
        expected_offset = s.end() + 1;
    }
    if expected_offset != transfer.total_size {
        bail!(
            "segments cover {} bytes, file has {}",
            expected_offset,
            transfer.total_size
        );
    }

    let mut dest_file =
        File::create(dest).with_context(|| format!("create destination {}", dest.display()))?;

    for s in &segments {
        let mut part = File::open(s.part_path())
            .with_context(|| format!("open part file {}", s.part_path().display()))?;
        let copied = io::copy(&mut part, &mut dest_file)
            .with_context(|| format!("merge part file {}", s.part_path().display()))?;
        let span = s.end() - s.start() + 1;
        if copied != span {
            bail!(
                "part file {} holds {} bytes, segment spans {}",
                s.part_path().display(),
                copied,
                span
            );
        }
        if let Err(e) = fs::remove_file(s.part_path()) {
            tracing::debug!(part = %s.part_path().display(), error = %e, "could not remove part file");
        }
    }

    dest_file
        .sync_all()
        .with_context(|| format!("sync {}", dest.display()))?;
    let merged_len = dest_file.metadata()?.len();
    if merged_len != transfer.total_size {
        bail!(
            "merged file is {} bytes, expected {}",
            merged_len,
            transfer.total_size
        );
    }

    // The temp dir should be empty now; if anything is left (e.g. a part file
    // we could not delete) keep it for inspection.
    let _ = fs::remove_dir(&transfer.tmp_dir);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CancelToken;
    use crate::downloader::SegmentStore;
    use std::fs::OpenOptions;
    use std::sync::Mutex;

    fn test_transfer(tmp_dir: PathBuf, total_size: u64) -> Transfer {
        Transfer {
            download_id: 0,
            url: "http://localhost/unused".to_string(),
            user_agent: "test".to_string(),
            total_size,
            store: SegmentStore::new(),
            cancel: CancelToken::new(),
            fatal: Mutex::new(None),
            tmp_dir,
            filename: "file.bin".to_string(),
        }
    }

    fn fill_segment(segment: &super::super::Segment, data: &[u8]) {
        let mut f = OpenOptions::new()
            .append(true)
            .open(segment.part_path())
            .unwrap();
        assert_eq!(segment.write_chunk(&mut f, data).unwrap(), data.len());
    }

    #[test]
    fn destination_inside_directory_or_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_destination(dir.path(), "file.bin"),
            dir.path().join("file.bin")
        );
        let explicit = dir.path().join("other.bin");
        assert_eq!(resolve_destination(&explicit, "file.bin"), explicit);
    }

    #[test]
    fn merges_parts_in_byte_order_and_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_dir = dir.path().join("file.bin-surge");
        fs::create_dir(&tmp_dir).unwrap();
        let transfer = test_transfer(tmp_dir.clone(), 100);

        let segments = transfer
            .store
            .seed(100, 2, |id| transfer.part_path(id))
            .unwrap();
        fill_segment(&segments[0], &[b'a'; 50]);
        fill_segment(&segments[1], &[b'b'; 50]);

        let dest = dir.path().join("file.bin");
        finalize(&transfer, &dest).unwrap();

        let merged = fs::read(&dest).unwrap();
        assert_eq!(merged.len(), 100);
        assert!(merged[..50].iter().all(|&b| b == b'a'));
        assert!(merged[50..].iter().all(|&b| b == b'b'));
        assert!(!segments[0].part_path().exists());
        assert!(!segments[1].part_path().exists());
        assert!(!tmp_dir.exists(), "empty temp dir should be removed");
    }

    #[test]
    fn refuses_to_merge_incomplete_segments() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_dir = dir.path().join("file.bin-surge");
        fs::create_dir(&tmp_dir).unwrap();
        let transfer = test_transfer(tmp_dir, 100);

        let segments = transfer
            .store
            .seed(100, 2, |id| transfer.part_path(id))
            .unwrap();
        fill_segment(&segments[0], &[b'a'; 50]);
        // Second segment left partially downloaded.
        let mut f = OpenOptions::new()
            .append(true)
            .open(segments[1].part_path())
            .unwrap();
        segments[1].write_chunk(&mut f, &[b'b'; 10]).unwrap();
        drop(f);

        let dest = dir.path().join("file.bin");
        let err = finalize(&transfer, &dest).unwrap_err();
        assert!(err.to_string().contains("refusing to merge"));
        assert!(!dest.exists(), "destination must not be created");
    }

    #[test]
    fn detects_part_file_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_dir = dir.path().join("file.bin-surge");
        fs::create_dir(&tmp_dir).unwrap();
        let transfer = test_transfer(tmp_dir, 100);

        let segments = transfer
            .store
            .seed(100, 2, |id| transfer.part_path(id))
            .unwrap();
        fill_segment(&segments[0], &[b'a'; 50]);
        fill_segment(&segments[1], &[b'b'; 50]);
        // Corrupt one part file behind the store's back.
        fs::write(segments[1].part_path(), b"tiny").unwrap();

        let dest = dir.path().join("file.bin");
        let err = finalize(&transfer, &dest).unwrap_err();
        assert!(err.to_string().contains("part file"));
    }
}
