use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-user storage accounting. `used_bytes <= total_bytes` is enforced by
/// the conditional update in the quota ledger, never by application-side
/// read-then-write.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_quotas")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub used_bytes: i64,
    pub total_bytes: i64,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
