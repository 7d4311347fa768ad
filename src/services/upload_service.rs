use crate::api::error::AppError;
use crate::entities::prelude::*;
use crate::entities::{file_records, transfer_jobs};
use crate::models::{DelFlag, FileKind, FileStatus, JobStatus, RequestCtx, UploadPhase};
use crate::services::dedup::DedupResolver;
use crate::services::quota::QuotaLedger;
use crate::services::session::SessionStore;
use crate::utils::naming::{self, NameGen};
use bytes::Bytes;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

/// One chunk of a chunked upload, as handed over by the transport layer.
pub struct ChunkUpload {
    pub file_id: Option<String>,
    pub file_name: String,
    pub parent_id: String,
    pub content_hash: String,
    pub chunk_index: u32,
    pub chunk_total: u32,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub file_id: String,
    pub phase: UploadPhase,
}

/// Orchestrates the synchronous half of an upload: dedup lookup on the first
/// chunk, quota admission, chunk persistence, and — on the last chunk — the
/// transactional commit of the file record together with its pipeline job.
///
/// The asynchronous half (assembly, transforms, finalize) belongs to the
/// transfer worker and only ever starts after this service's transaction has
/// committed.
pub struct UploadService {
    db: DatabaseConnection,
    quota: Arc<QuotaLedger>,
    sessions: Arc<SessionStore>,
    dedup: DedupResolver,
    names: NameGen,
    max_chunk_size: usize,
    worker_wake: Arc<Notify>,
}

impl UploadService {
    pub fn new(
        db: DatabaseConnection,
        quota: Arc<QuotaLedger>,
        sessions: Arc<SessionStore>,
        max_chunk_size: usize,
        worker_wake: Arc<Notify>,
    ) -> Self {
        let dedup = DedupResolver::new(db.clone());
        Self {
            db,
            quota,
            sessions,
            dedup,
            names: NameGen::new(),
            max_chunk_size,
            worker_wake,
        }
    }

    pub async fn submit_chunk(
        &self,
        ctx: &RequestCtx,
        req: ChunkUpload,
    ) -> Result<UploadOutcome, AppError> {
        if req.file_name.trim().is_empty() {
            return Err(AppError::BadRequest("File name must not be empty".to_string()));
        }
        if req.content_hash.trim().is_empty() {
            return Err(AppError::BadRequest("Content hash must not be empty".to_string()));
        }
        if req.chunk_total == 0 {
            return Err(AppError::BadRequest("Chunk total must be positive".to_string()));
        }
        if req.chunk_index >= req.chunk_total {
            return Err(AppError::BadRequest(format!(
                "Chunk index {} out of range for {} chunks",
                req.chunk_index, req.chunk_total
            )));
        }
        if req.bytes.len() > self.max_chunk_size {
            return Err(AppError::BadRequest(format!(
                "Chunk exceeds maximum size of {} bytes",
                self.max_chunk_size
            )));
        }

        let file_id = req
            .file_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.names.file_id());

        match self.handle_chunk(ctx, &file_id, &req).await {
            Ok(phase) => Ok(UploadOutcome { file_id, phase }),
            Err(e) => {
                // No partial session, counter or quota debit survives a
                // failed synchronous call.
                self.sessions.discard(&ctx.user_id, &file_id).await;
                Err(e)
            }
        }
    }

    async fn handle_chunk(
        &self,
        ctx: &RequestCtx,
        file_id: &str,
        req: &ChunkUpload,
    ) -> Result<UploadPhase, AppError> {
        // Only the first chunk carries a dedup opportunity; a hit means the
        // whole upload collapses into a metadata clone.
        if req.chunk_index == 0 {
            if let Some(existing) = self.dedup.resolve(&req.content_hash).await? {
                self.clone_existing(ctx, file_id, req, existing).await?;
                return Ok(UploadPhase::Instant);
            }
        }

        let session_bytes = self.sessions.current_bytes(&ctx.user_id, file_id);
        let (used, total) = self.quota.current_usage(&ctx.user_id).await?;
        if req.bytes.len() as i64 + session_bytes + used > total {
            return Err(AppError::StorageInsufficient);
        }

        let delta = self
            .sessions
            .write_chunk(&ctx.user_id, file_id, req.chunk_index, &req.bytes)
            .await?;
        let session_total = self.sessions.add_bytes(&ctx.user_id, file_id, delta);

        if req.chunk_index < req.chunk_total - 1 {
            return Ok(UploadPhase::Uploading);
        }

        self.commit_upload(ctx, file_id, req, session_total).await?;
        // Strictly after commit: the job row is durable, let the worker at it.
        self.worker_wake.notify_one();
        Ok(UploadPhase::Finished)
    }

    /// Instant upload: the content already exists under some other record.
    /// Creates an independent record pointing at the same stored artifact —
    /// no bytes move, but the clone is billed against this user's quota.
    async fn clone_existing(
        &self,
        ctx: &RequestCtx,
        file_id: &str,
        req: &ChunkUpload,
        existing: file_records::Model,
    ) -> Result<(), AppError> {
        let size_bytes = existing.size_bytes.unwrap_or(0);
        let file_name = self
            .resolve_name(&ctx.user_id, &req.parent_id, &req.file_name)
            .await?;
        let now = Utc::now().fixed_offset();

        let quota = self.quota.clone();
        let user_id = ctx.user_id.clone();
        let file_id_owned = file_id.to_string();
        let parent_id = req.parent_id.clone();
        let content_hash = req.content_hash.clone();

        self.db
            .transaction::<_, (), AppError>(move |txn| {
                Box::pin(async move {
                    if !quota.try_reserve(txn, &user_id, size_bytes).await? {
                        return Err(AppError::StorageInsufficient);
                    }

                    file_records::ActiveModel {
                        file_id: Set(file_id_owned),
                        user_id: Set(user_id.clone()),
                        file_name: Set(file_name),
                        parent_id: Set(parent_id),
                        content_hash: Set(Some(content_hash)),
                        size_bytes: Set(existing.size_bytes),
                        stored_path: Set(existing.stored_path.clone()),
                        cover_path: Set(existing.cover_path.clone()),
                        category: Set(existing.category),
                        file_kind: Set(existing.file_kind),
                        status: Set(FileStatus::Using),
                        del_flag: Set(DelFlag::Active),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;
                    Ok(())
                })
            })
            .await
            .map_err(AppError::from)?;

        info!(user_id = %ctx.user_id, file_id, size_bytes, "instant upload from existing artifact");
        Ok(())
    }

    /// Last chunk: debit the session total and commit the transferring record
    /// together with its outbox job, all in one transaction.
    async fn commit_upload(
        &self,
        ctx: &RequestCtx,
        file_id: &str,
        req: &ChunkUpload,
        session_total: i64,
    ) -> Result<(), AppError> {
        let suffix = naming::file_suffix(&req.file_name).to_string();
        let kind = FileKind::from_suffix(&suffix);
        let category = kind.category();
        let month = Utc::now().format("%Y%m").to_string();
        let stored_rel = format!("{month}/{}{}{}", ctx.user_id, file_id, suffix);
        let file_name = self
            .resolve_name(&ctx.user_id, &req.parent_id, &req.file_name)
            .await?;
        let session_dir = self
            .sessions
            .session_dir(&ctx.user_id, file_id)
            .to_string_lossy()
            .into_owned();
        let now = Utc::now().fixed_offset();

        let quota = self.quota.clone();
        let user_id = ctx.user_id.clone();
        let file_id_owned = file_id.to_string();
        let parent_id = req.parent_id.clone();
        let content_hash = req.content_hash.clone();
        let chunk_total = req.chunk_total;

        self.db
            .transaction::<_, (), AppError>(move |txn| {
                Box::pin(async move {
                    if !quota.try_reserve(txn, &user_id, session_total).await? {
                        return Err(AppError::StorageInsufficient);
                    }

                    file_records::ActiveModel {
                        file_id: Set(file_id_owned.clone()),
                        user_id: Set(user_id.clone()),
                        file_name: Set(file_name),
                        parent_id: Set(parent_id),
                        content_hash: Set(Some(content_hash)),
                        size_bytes: Set(None),
                        stored_path: Set(Some(stored_rel)),
                        cover_path: Set(None),
                        category: Set(category),
                        file_kind: Set(kind),
                        status: Set(FileStatus::Transferring),
                        del_flag: Set(DelFlag::Active),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    transfer_jobs::ActiveModel {
                        id: Set(Uuid::new_v4().to_string()),
                        file_id: Set(file_id_owned),
                        user_id: Set(user_id),
                        session_dir: Set(session_dir),
                        chunk_count: Set(chunk_total as i32),
                        status: Set(JobStatus::Pending),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;
                    Ok(())
                })
            })
            .await
            .map_err(AppError::from)?;

        // The debit happened; the admission counter has served its purpose.
        // The chunk directory stays behind for the assembler.
        self.sessions.forget_counter(&ctx.user_id, file_id);

        info!(
            user_id = %ctx.user_id,
            file_id,
            size_bytes = session_total,
            chunks = req.chunk_total,
            "upload committed, transfer queued"
        );
        Ok(())
    }

    /// Pick a name that is free in the destination folder, tagging the
    /// requested one when it is already taken.
    async fn resolve_name(
        &self,
        user_id: &str,
        parent_id: &str,
        file_name: &str,
    ) -> Result<String, DbErr> {
        let taken = FileRecords::find()
            .filter(file_records::Column::UserId.eq(user_id))
            .filter(file_records::Column::ParentId.eq(parent_id))
            .filter(file_records::Column::FileName.eq(file_name))
            .filter(file_records::Column::DelFlag.eq(DelFlag::Active))
            .one(&self.db)
            .await?
            .is_some();

        if taken {
            let renamed = self.names.rename(file_name);
            warn!(user_id, parent_id, file_name, renamed = %renamed, "name collision, auto-renaming");
            Ok(renamed)
        } else {
            Ok(file_name.to_string())
        }
    }
}
