use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::warn;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("session directory {0} does not exist")]
    MissingSessionDir(PathBuf),

    #[error("chunk {index} is missing")]
    MissingChunk { index: u32 },

    #[error("io error during assembly: {0}")]
    Io(#[from] std::io::Error),
}

/// Merge the numeric-named chunk files in `session_dir` into `target`.
///
/// Chunks are ordered by the integer value of their file name, never
/// lexically. All indices `0..expected_chunks` must be present or the call
/// fails before `target` is touched. The merged bytes land in a `.tmp`
/// sibling first, which is then renamed over `target`; only after the rename
/// succeeds is the session directory removed. A crash between rename and
/// removal leaves an orphaned directory behind, which is cleaned up out of
/// band.
pub async fn union(
    session_dir: &Path,
    target: &Path,
    expected_chunks: u32,
) -> Result<(), AssembleError> {
    let meta = fs::metadata(session_dir).await;
    if !meta.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(AssembleError::MissingSessionDir(session_dir.to_path_buf()));
    }

    // The session directory is owned exclusively by the upload pipeline, so
    // everything with a purely numeric name is a chunk.
    let mut chunks: BTreeMap<u32, PathBuf> = BTreeMap::new();
    let mut entries = fs::read_dir(session_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if entry.file_type().await?.is_file() {
            chunks.insert(index, entry.path());
        }
    }

    for index in 0..expected_chunks {
        if !chunks.contains_key(&index) {
            return Err(AssembleError::MissingChunk { index });
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = target.with_file_name(tmp_name);

    let merge = async {
        let mut out = BufWriter::new(fs::File::create(&tmp).await?);
        for (index, path) in &chunks {
            if *index >= expected_chunks {
                warn!(index, dir = %session_dir.display(), "ignoring chunk beyond expected count");
                continue;
            }
            let mut input = fs::File::open(path).await?;
            tokio::io::copy(&mut input, &mut out).await?;
        }
        out.flush().await?;
        Ok::<(), std::io::Error>(())
    };
    if let Err(e) = merge.await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    // Atomic replace; some filesystems cannot rename across mounts, in which
    // case we degrade to a plain copy.
    if let Err(e) = fs::rename(&tmp, target).await {
        warn!(
            from = %tmp.display(),
            to = %target.display(),
            error = %e,
            "atomic rename unavailable, falling back to non-atomic replace"
        );
        fs::copy(&tmp, target).await?;
        let _ = fs::remove_file(&tmp).await;
    }

    if let Err(e) = fs::remove_dir_all(session_dir).await {
        warn!(dir = %session_dir.display(), error = %e, "failed to remove session directory");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_chunks(dir: &Path, parts: &[&[u8]]) {
        for (i, part) in parts.iter().enumerate() {
            fs::write(dir.join(i.to_string()), part).await.unwrap();
        }
    }

    #[tokio::test]
    async fn merges_chunks_in_index_order() {
        let tmp = tempfile::tempdir().unwrap();
        let session = tmp.path().join("session");
        fs::create_dir_all(&session).await.unwrap();
        write_chunks(&session, &[b"hello ", b"chunked ", b"world"]).await;

        let target = tmp.path().join("out/final.bin");
        union(&session, &target, 3).await.unwrap();

        assert_eq!(fs::read(&target).await.unwrap(), b"hello chunked world");
        assert!(!session.exists(), "session dir must be consumed");
    }

    #[tokio::test]
    async fn orders_numerically_not_lexically() {
        let tmp = tempfile::tempdir().unwrap();
        let session = tmp.path().join("session");
        fs::create_dir_all(&session).await.unwrap();
        // Lexical order would put "10" before "2".
        for i in 0..11u32 {
            fs::write(session.join(i.to_string()), [i as u8])
                .await
                .unwrap();
        }

        let target = tmp.path().join("final.bin");
        union(&session, &target, 11).await.unwrap();

        let merged = fs::read(&target).await.unwrap();
        assert_eq!(merged, (0..11u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn missing_chunk_leaves_target_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let session = tmp.path().join("session");
        fs::create_dir_all(&session).await.unwrap();
        for i in [0u32, 1, 2, 4] {
            fs::write(session.join(i.to_string()), b"x").await.unwrap();
        }

        let target = tmp.path().join("final.bin");
        let err = union(&session, &target, 5).await.unwrap_err();
        assert!(matches!(err, AssembleError::MissingChunk { index: 3 }));
        assert!(!target.exists());
        assert!(session.exists(), "failed assembly must not consume chunks");
    }

    #[tokio::test]
    async fn rejects_missing_session_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let err = union(
            &tmp.path().join("nope"),
            &tmp.path().join("final.bin"),
            1,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AssembleError::MissingSessionDir(_)));
    }

    #[tokio::test]
    async fn reassembly_reproduces_original_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let session = tmp.path().join("session");
        fs::create_dir_all(&session).await.unwrap();

        let original: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let parts: Vec<&[u8]> = original.chunks(7_919).collect();
        write_chunks(&session, &parts).await;

        let target = tmp.path().join("final.bin");
        union(&session, &target, parts.len() as u32).await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), original);
    }
}
