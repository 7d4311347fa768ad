use crate::models::{DelFlag, FileCategory, FileKind, FileStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog entry for one user-visible file. Identity is the composite
/// `(file_id, user_id)`; deduplicated files are distinct records sharing the
/// same `stored_path`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub file_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub file_name: String,
    /// Parent folder id; "0" is the root folder.
    pub parent_id: String,
    pub content_hash: Option<String>,
    /// Final byte size, written by the pipeline's finalize step.
    pub size_bytes: Option<i64>,
    /// Path of the assembled artifact, relative to the files root.
    pub stored_path: Option<String>,
    pub cover_path: Option<String>,
    pub category: FileCategory,
    pub file_kind: FileKind,
    pub status: FileStatus,
    pub del_flag: DelFlag,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
