use std::env;
use std::path::PathBuf;

/// Storage and pipeline configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all stored data; chunk sessions live under
    /// `<data_root>/temp`, assembled files under `<data_root>/file`
    pub data_root: PathBuf,

    /// Storage allowance granted to a user on first touch (default: 10 GiB)
    pub default_quota_bytes: i64,

    /// Time-to-live of an upload session's byte counter (default: 1 hour)
    pub session_ttl_secs: u64,

    /// Time-to-live of a cached quota snapshot (default: 1 day)
    pub quota_cache_ttl_secs: u64,

    /// Maximum accepted chunk size in bytes (default: 16 MiB)
    pub max_chunk_size: usize,

    /// Width bound for generated covers/thumbnails (default: 150)
    pub thumbnail_width: u32,

    /// Duration of one HLS segment in seconds (default: 30)
    pub segment_seconds: u32,

    /// Binary used for segmentation and scaling (default: "ffmpeg")
    pub ffmpeg_bin: String,

    /// Hard timeout for one external tool invocation (default: 30 minutes)
    pub tool_timeout_secs: u64,

    /// Transfer worker poll interval (default: 5 seconds)
    pub worker_poll_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            default_quota_bytes: 10 * 1024 * 1024 * 1024,
            session_ttl_secs: 3600,
            quota_cache_ttl_secs: 24 * 3600,
            max_chunk_size: 16 * 1024 * 1024,
            thumbnail_width: 150,
            segment_seconds: 30,
            ffmpeg_bin: "ffmpeg".to_string(),
            tool_timeout_secs: 30 * 60,
            worker_poll_secs: 5,
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            data_root: env::var("DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.data_root),

            default_quota_bytes: env::var("DEFAULT_QUOTA_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.default_quota_bytes),

            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_ttl_secs),

            quota_cache_ttl_secs: env::var("QUOTA_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.quota_cache_ttl_secs),

            max_chunk_size: env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunk_size),

            thumbnail_width: env::var("THUMBNAIL_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.thumbnail_width),

            segment_seconds: env::var("SEGMENT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.segment_seconds),

            ffmpeg_bin: env::var("FFMPEG_BIN").unwrap_or(default.ffmpeg_bin),

            tool_timeout_secs: env::var("TOOL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tool_timeout_secs),

            worker_poll_secs: env::var("WORKER_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.worker_poll_secs),
        }
    }

    /// Directory holding per-upload chunk session folders.
    pub fn temp_root(&self) -> PathBuf {
        self.data_root.join("temp")
    }

    /// Directory holding assembled files, bucketed by month.
    pub fn files_root(&self) -> PathBuf {
        self.data_root.join("file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = StorageConfig::default();
        assert_eq!(config.thumbnail_width, 150);
        assert_eq!(config.segment_seconds, 30);
        assert!(config.default_quota_bytes > 0);
        assert_eq!(config.temp_root(), PathBuf::from("./data/temp"));
        assert_eq!(config.files_root(), PathBuf::from("./data/file"));
    }
}
