use dashmap::DashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::warn;

#[derive(Clone, Copy, Debug)]
struct Counter {
    bytes: i64,
    expires_at: Instant,
}

/// Ephemeral upload sessions: one temp directory of numeric-named chunk files
/// per `(user_id, file_id)`, plus an in-process byte counter with a bounded
/// TTL so abandoned uploads self-expire instead of counting against admission
/// forever. Counters expire lazily on access; orphaned temp directories are
/// cleaned up out of band, not by this store.
pub struct SessionStore {
    temp_root: PathBuf,
    counters: DashMap<String, Counter>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(temp_root: PathBuf, ttl: Duration) -> Self {
        Self {
            temp_root,
            counters: DashMap::new(),
            ttl,
        }
    }

    fn key(user_id: &str, file_id: &str) -> String {
        format!("{user_id}{file_id}")
    }

    /// The chunk directory for one upload session. This subsystem owns the
    /// directory exclusively; nothing else may place files in it.
    pub fn session_dir(&self, user_id: &str, file_id: &str) -> PathBuf {
        self.temp_root.join(Self::key(user_id, file_id))
    }

    /// Persist one chunk under its numeric index. Re-sending an index
    /// overwrites the previous bytes, which is what makes client retries
    /// idempotent. Returns the net byte delta against whatever was stored
    /// under that index before, so retries do not inflate the counter.
    pub async fn write_chunk(
        &self,
        user_id: &str,
        file_id: &str,
        index: u32,
        bytes: &[u8],
    ) -> std::io::Result<i64> {
        let dir = self.session_dir(user_id, file_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(index.to_string());
        let previous = fs::metadata(&path).await.map(|m| m.len() as i64).unwrap_or(0);
        fs::write(&path, bytes).await?;
        Ok(bytes.len() as i64 - previous)
    }

    /// Bytes received so far in this session; an expired counter reads as 0.
    pub fn current_bytes(&self, user_id: &str, file_id: &str) -> i64 {
        let key = Self::key(user_id, file_id);
        let counter = self.counters.get(&key).map(|c| *c);
        match counter {
            Some(c) if c.expires_at > Instant::now() => c.bytes,
            Some(_) => {
                self.counters.remove(&key);
                0
            }
            None => 0,
        }
    }

    /// Add received bytes to the session counter, refreshing its TTL.
    /// Returns the running total.
    pub fn add_bytes(&self, user_id: &str, file_id: &str, n: i64) -> i64 {
        let now = Instant::now();
        let mut counter = self
            .counters
            .entry(Self::key(user_id, file_id))
            .or_insert(Counter {
                bytes: 0,
                expires_at: now + self.ttl,
            });
        if counter.expires_at <= now {
            counter.bytes = 0;
        }
        counter.bytes += n;
        counter.expires_at = now + self.ttl;
        counter.bytes
    }

    /// Drop the byte counter only; the chunk directory stays for the
    /// assembler to consume.
    pub fn forget_counter(&self, user_id: &str, file_id: &str) {
        self.counters.remove(&Self::key(user_id, file_id));
    }

    /// Tear the whole session down: counter and temp directory. Used when a
    /// synchronous upload step fails.
    pub async fn discard(&self, user_id: &str, file_id: &str) {
        self.forget_counter(user_id, file_id);
        let dir = self.session_dir(user_id, file_id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "failed to remove session directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_accumulates_and_expires() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf(), Duration::from_millis(30));

        assert_eq!(store.current_bytes("u1", "f1"), 0);
        assert_eq!(store.add_bytes("u1", "f1", 100), 100);
        assert_eq!(store.add_bytes("u1", "f1", 50), 150);
        assert_eq!(store.current_bytes("u1", "f1"), 150);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.current_bytes("u1", "f1"), 0, "expired counter reads as zero");
    }

    #[tokio::test]
    async fn rewriting_an_index_overwrites_without_double_counting() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf(), Duration::from_secs(60));

        let delta = store.write_chunk("u1", "f1", 0, b"first").await.unwrap();
        assert_eq!(delta, 5);
        let delta = store.write_chunk("u1", "f1", 0, b"second").await.unwrap();
        assert_eq!(delta, 1, "resend counts only the size difference");

        let path = store.session_dir("u1", "f1").join("0");
        assert_eq!(fs::read(&path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn discard_removes_directory_and_counter() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf(), Duration::from_secs(60));

        store.write_chunk("u1", "f1", 0, b"x").await.unwrap();
        store.add_bytes("u1", "f1", 1);
        store.discard("u1", "f1").await;

        assert!(!store.session_dir("u1", "f1").exists());
        assert_eq!(store.current_bytes("u1", "f1"), 0);
        // Discarding a session that never existed is fine.
        store.discard("u1", "missing").await;
    }
}
