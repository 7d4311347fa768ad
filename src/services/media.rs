use crate::config::StorageConfig;
use crate::utils::process::{self, ProcessError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const PLAYLIST_NAME: &str = "index.m3u8";

/// External media transforms consumed by the transfer pipeline. Implemented
/// with ffmpeg in production; tests may substitute their own transformer.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Split `source` into fixed-duration HLS segments plus a playlist, in a
    /// directory named after the source without its extension. `file_id`
    /// names the segment files.
    async fn segment_video(&self, source: &Path, file_id: &str) -> Result<(), ProcessError>;

    /// Extract one representative frame of `source` as a width-bounded cover.
    async fn video_cover(&self, source: &Path, cover: &Path) -> Result<(), ProcessError>;

    /// Produce a width-bounded thumbnail of `source`. Returns `Ok(false)`
    /// without writing anything when the source is already narrow enough or
    /// cannot be probed; never upscales.
    async fn image_thumbnail(&self, source: &Path, thumbnail: &Path)
    -> Result<bool, ProcessError>;
}

/// Directory the segments and playlist of `source` go into.
pub fn segment_dir(source: &Path) -> PathBuf {
    source.with_extension("")
}

pub struct FfmpegTransformer {
    bin: String,
    segment_seconds: u32,
    thumbnail_width: u32,
    timeout: Duration,
}

enum SegmentMode {
    /// No re-encode; only works when the input is already H.264 + AAC.
    Copy,
    /// Full re-encode; works on any input but is much slower.
    Reencode,
}

impl FfmpegTransformer {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            bin: config.ffmpeg_bin.clone(),
            segment_seconds: config.segment_seconds,
            thumbnail_width: config.thumbnail_width,
            timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }

    fn hls_args(
        &self,
        source: &Path,
        playlist: &Path,
        segment_template: &Path,
        mode: SegmentMode,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            source.to_string_lossy().into_owned(),
            "-map".into(),
            "0:v:0".into(),
            // The audio stream may be absent; "?" tolerates that.
            "-map".into(),
            "0:a:0?".into(),
        ];
        match mode {
            SegmentMode::Copy => args.extend(
                [
                    "-c:v",
                    "copy",
                    "-c:a",
                    "copy",
                    "-bsf:v",
                    "h264_mp4toannexb",
                ]
                .map(String::from),
            ),
            SegmentMode::Reencode => args.extend(
                [
                    "-c:v", "h264", "-preset", "veryfast", "-profile:v", "main", "-level", "4.1",
                    "-c:a", "aac", "-b:a", "128k", "-ac", "2",
                ]
                .map(String::from),
            ),
        }
        args.extend([
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.segment_seconds.to_string(),
            "-hls_playlist_type".into(),
            "vod".into(),
            "-hls_segment_filename".into(),
            segment_template.to_string_lossy().into_owned(),
            playlist.to_string_lossy().into_owned(),
        ]);
        args
    }

    fn scale_args(&self, source: &Path, target: &Path, extra: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            source.to_string_lossy().into_owned(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        args.extend([
            "-vf".into(),
            format!("scale={}:-1", self.thumbnail_width),
            target.to_string_lossy().into_owned(),
        ]);
        args
    }
}

#[async_trait]
impl MediaTransformer for FfmpegTransformer {
    async fn segment_video(&self, source: &Path, file_id: &str) -> Result<(), ProcessError> {
        let ts_dir = segment_dir(source);
        tokio::fs::create_dir_all(&ts_dir)
            .await
            .map_err(|e| ProcessError::Io {
                command: format!("mkdir {}", ts_dir.display()),
                source: e,
            })?;
        let playlist = ts_dir.join(PLAYLIST_NAME);
        let segment_template = ts_dir.join(format!("{file_id}_%04d.ts"));

        let copy_args = self.hls_args(source, &playlist, &segment_template, SegmentMode::Copy);
        match process::run(&self.bin, &copy_args, Some(&ts_dir), self.timeout).await {
            Ok(()) => return Ok(()),
            Err(ProcessError::NonZeroExit { code, .. }) => {
                // Source is not H.264 + AAC; fall back to re-encoding.
                info!(source = %source.display(), code, "stream-copy segmentation rejected, re-encoding");
            }
            Err(e) => return Err(e),
        }

        let reencode_args =
            self.hls_args(source, &playlist, &segment_template, SegmentMode::Reencode);
        process::run(&self.bin, &reencode_args, Some(&ts_dir), self.timeout).await
    }

    async fn video_cover(&self, source: &Path, cover: &Path) -> Result<(), ProcessError> {
        if let Some(parent) = cover.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProcessError::Io {
                    command: format!("mkdir {}", parent.display()),
                    source: e,
                })?;
        }
        let args = self.scale_args(source, cover, &["-vframes", "1"]);
        process::run(&self.bin, &args, source.parent(), self.timeout).await
    }

    async fn image_thumbnail(
        &self,
        source: &Path,
        thumbnail: &Path,
    ) -> Result<bool, ProcessError> {
        // Probe the dimensions first; sources at or below the bound are left
        // alone rather than upscaled.
        let (width, _height) = match image::image_dimensions(source) {
            Ok(dim) => dim,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "could not probe image dimensions");
                return Ok(false);
            }
        };
        if width <= self.thumbnail_width {
            return Ok(false);
        }

        if let Some(parent) = thumbnail.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProcessError::Io {
                    command: format!("mkdir {}", parent.display()),
                    source: e,
                })?;
        }
        let args = self.scale_args(source, thumbnail, &[]);
        process::run(&self.bin, &args, source.parent(), self.timeout).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_dir_strips_extension() {
        assert_eq!(
            segment_dir(Path::new("/data/file/202601/u1abc.mp4")),
            PathBuf::from("/data/file/202601/u1abc")
        );
    }

    #[tokio::test]
    async fn small_image_is_not_upscaled() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("small.png");
        let img = image::RgbImage::from_pixel(20, 20, image::Rgb([10, 20, 30]));
        img.save(&source).unwrap();

        let transformer = FfmpegTransformer::new(&StorageConfig::default());
        let created = transformer
            .image_thumbnail(&source, &tmp.path().join("small_.png"))
            .await
            .unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn unreadable_image_probes_as_skip() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("not-an-image.png");
        tokio::fs::write(&source, b"junk").await.unwrap();

        let transformer = FfmpegTransformer::new(&StorageConfig::default());
        let created = transformer
            .image_thumbnail(&source, &tmp.path().join("out.png"))
            .await
            .unwrap();
        assert!(!created);
    }
}
