use crate::entities::prelude::*;
use crate::entities::{file_records, transfer_jobs};
use crate::models::{FileCategory, FileStatus};
use crate::services::media::MediaTransformer;
use crate::utils::assemble::{self, AssembleError};
use crate::utils::process::ProcessError;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("assembly failed: {0}")]
    Assembly(#[from] AssembleError),

    #[error("media transform failed: {0}")]
    Transform(#[from] ProcessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Post-processing pipeline for committed uploads.
///
/// Per record the state machine is `Transferring -> {Using, TransferFailed}`;
/// both outcomes are terminal and there is no automatic retry — re-uploading
/// is the recovery path. Assembly and transform failures are recorded on the
/// file record, never surfaced to the uploader (who has long since received
/// their response).
pub struct TransferService {
    db: DatabaseConnection,
    media: Arc<dyn MediaTransformer>,
    files_root: PathBuf,
}

impl TransferService {
    pub fn new(
        db: DatabaseConnection,
        media: Arc<dyn MediaTransformer>,
        files_root: PathBuf,
    ) -> Self {
        Self {
            db,
            media,
            files_root,
        }
    }

    /// Run the pipeline for one outbox job. Only infrastructure (database)
    /// errors bubble up; everything else finalizes the record one way or the
    /// other.
    pub async fn process(&self, job: &transfer_jobs::Model) -> Result<(), DbErr> {
        let record = FileRecords::find_by_id((job.file_id.clone(), job.user_id.clone()))
            .one(&self.db)
            .await?;
        let Some(record) = record else {
            warn!(file_id = %job.file_id, user_id = %job.user_id, "transfer job without file record, skipping");
            return Ok(());
        };

        // Duplicate trigger delivery: a record that already left Transferring
        // is done, whatever the outcome was.
        if record.status != FileStatus::Transferring {
            info!(file_id = %record.file_id, status = ?record.status, "record already finalized, skipping");
            return Ok(());
        }

        let Some(stored_rel) = record.stored_path.clone() else {
            error!(file_id = %record.file_id, "record in transfer without stored path");
            return self.finalize(&record, false, 0, None).await;
        };
        let target = self.files_root.join(&stored_rel);

        let (succeeded, cover) = match self.transform(&record, job, &target, &stored_rel).await {
            Ok(cover) => (true, cover),
            Err(e) => {
                error!(
                    file_id = %record.file_id,
                    user_id = %record.user_id,
                    error = %e,
                    "transfer failed"
                );
                (false, None)
            }
        };

        // Whatever happened, the recorded size reflects what is actually on
        // disk at the stored path.
        let size_bytes = tokio::fs::metadata(&target)
            .await
            .map(|m| m.len() as i64)
            .unwrap_or(0);

        self.finalize(&record, succeeded, size_bytes, cover).await
    }

    async fn transform(
        &self,
        record: &file_records::Model,
        job: &transfer_jobs::Model,
        target: &Path,
        stored_rel: &str,
    ) -> Result<Option<String>, TransferError> {
        assemble::union(
            Path::new(&job.session_dir),
            target,
            job.chunk_count.max(0) as u32,
        )
        .await?;

        match record.category {
            FileCategory::Video => {
                self.media.segment_video(target, &record.file_id).await?;
                let cover_rel = replace_suffix(stored_rel, ".png");
                self.media
                    .video_cover(target, &self.files_root.join(&cover_rel))
                    .await?;
                Ok(Some(cover_rel))
            }
            FileCategory::Image => {
                let cover_rel = thumbnail_name(stored_rel);
                let cover_abs = self.files_root.join(&cover_rel);
                let created = match self.media.image_thumbnail(target, &cover_abs).await {
                    Ok(created) => created,
                    Err(e) => {
                        // Thumbnailing is best-effort; the original stands in.
                        warn!(file_id = %record.file_id, error = %e, "thumbnail generation failed");
                        false
                    }
                };
                if !created {
                    tokio::fs::copy(target, &cover_abs).await?;
                }
                Ok(Some(cover_rel))
            }
            _ => Ok(None),
        }
    }

    /// Conditional terminal transition. The status guard makes a racing
    /// duplicate run that reached this point independently a no-op.
    async fn finalize(
        &self,
        record: &file_records::Model,
        succeeded: bool,
        size_bytes: i64,
        cover_path: Option<String>,
    ) -> Result<(), DbErr> {
        let status = if succeeded {
            FileStatus::Using
        } else {
            FileStatus::TransferFailed
        };

        let result = FileRecords::update_many()
            .col_expr(file_records::Column::Status, Expr::value(status))
            .col_expr(file_records::Column::SizeBytes, Expr::value(size_bytes))
            .col_expr(file_records::Column::CoverPath, Expr::value(cover_path))
            .col_expr(
                file_records::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(file_records::Column::FileId.eq(&record.file_id))
            .filter(file_records::Column::UserId.eq(&record.user_id))
            .filter(file_records::Column::Status.eq(FileStatus::Transferring))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(file_id = %record.file_id, "record was finalized by a concurrent run");
        } else {
            info!(file_id = %record.file_id, ?status, size_bytes, "record finalized");
        }
        Ok(())
    }
}

/// `202601/u1abc.mp4` -> `202601/u1abc.png`
fn replace_suffix(stored_rel: &str, new_suffix: &str) -> String {
    match stored_rel.rfind('.') {
        Some(pos) => format!("{}{}", &stored_rel[..pos], new_suffix),
        None => format!("{stored_rel}{new_suffix}"),
    }
}

/// `202601/u1abc.jpg` -> `202601/u1abc_.jpg`
fn thumbnail_name(stored_rel: &str) -> String {
    match stored_rel.rfind('.') {
        Some(pos) => format!("{}_{}", &stored_rel[..pos], &stored_rel[pos..]),
        None => format!("{stored_rel}_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_names_follow_stored_path() {
        assert_eq!(replace_suffix("202601/u1abc.mp4", ".png"), "202601/u1abc.png");
        assert_eq!(thumbnail_name("202601/u1abc.jpg"), "202601/u1abc_.jpg");
        assert_eq!(thumbnail_name("202601/noext"), "202601/noext_");
    }
}
