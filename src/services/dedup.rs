use crate::entities::file_records;
use crate::entities::prelude::*;
use crate::models::FileStatus;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};

/// Maps a content hash to an existing stored artifact, enabling instant
/// uploads. Pure metadata lookup over records in `Using` state; the physical
/// file is never re-verified (see DESIGN.md).
pub struct DedupResolver {
    db: DatabaseConnection,
}

impl DedupResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn resolve(
        &self,
        content_hash: &str,
    ) -> Result<Option<file_records::Model>, DbErr> {
        FileRecords::find()
            .filter(file_records::Column::ContentHash.eq(content_hash))
            .filter(file_records::Column::Status.eq(FileStatus::Using))
            .one(&self.db)
            .await
    }
}
