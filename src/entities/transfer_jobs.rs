use crate::models::JobStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outbox row for the post-processing pipeline. Inserted in the same
/// transaction that creates the `Transferring` file record, so the worker can
/// never observe a job whose record might still roll back.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfer_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub file_id: String,
    pub user_id: String,
    /// Absolute path of the chunk session directory to assemble.
    pub session_dir: String,
    pub chunk_count: i32,
    pub status: JobStatus,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
