use crate::entities::prelude::*;
use crate::entities::user_quotas;
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, ExprTrait, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone, Copy, Debug)]
struct Snapshot {
    used: i64,
    total: i64,
    fetched_at: Instant,
}

/// Atomic per-user storage accounting.
///
/// Every mutation is a single conditional UPDATE at the database, so the
/// `used <= total` invariant holds across concurrent uploads and across
/// server processes without any application-level lock. Reads go through a
/// TTL'd snapshot cache that is invalidated on every successful mutation.
pub struct QuotaLedger {
    db: DatabaseConnection,
    snapshots: DashMap<String, Snapshot>,
    snapshot_ttl: Duration,
    default_total: i64,
}

impl QuotaLedger {
    pub fn new(db: DatabaseConnection, default_total: i64, snapshot_ttl: Duration) -> Self {
        Self {
            db,
            snapshots: DashMap::new(),
            snapshot_ttl,
            default_total,
        }
    }

    /// Reserve `delta` bytes for the user. Applies `used += delta` only if
    /// the result stays within the allowance; otherwise nothing changes and
    /// `false` is returned. Runs against `conn` so it can participate in the
    /// caller's transaction.
    pub async fn try_reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
        delta: i64,
    ) -> Result<bool, DbErr> {
        if delta < 0 {
            return Ok(false);
        }
        self.ensure_row(conn, user_id).await?;

        let result = UserQuotas::update_many()
            .col_expr(
                user_quotas::Column::UsedBytes,
                Expr::col(user_quotas::Column::UsedBytes).add(delta),
            )
            .col_expr(
                user_quotas::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(user_quotas::Column::UserId.eq(user_id))
            .filter(
                Expr::col(user_quotas::Column::UsedBytes)
                    .add(delta)
                    .lte(Expr::col(user_quotas::Column::TotalBytes)),
            )
            .exec(conn)
            .await?;

        let reserved = result.rows_affected > 0;
        if reserved {
            self.snapshots.remove(user_id);
        }
        Ok(reserved)
    }

    /// Undo a prior reservation, clamped at zero.
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
        delta: i64,
    ) -> Result<(), DbErr> {
        if delta <= 0 {
            return Ok(());
        }

        let result = UserQuotas::update_many()
            .col_expr(
                user_quotas::Column::UsedBytes,
                Expr::col(user_quotas::Column::UsedBytes).sub(delta),
            )
            .col_expr(
                user_quotas::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(user_quotas::Column::UserId.eq(user_id))
            .filter(Expr::col(user_quotas::Column::UsedBytes).gte(delta))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(user_id, delta, "release exceeds recorded usage, clamping to zero");
            UserQuotas::update_many()
                .col_expr(user_quotas::Column::UsedBytes, Expr::value(0i64))
                .col_expr(
                    user_quotas::Column::UpdatedAt,
                    Expr::value(Utc::now().fixed_offset()),
                )
                .filter(user_quotas::Column::UserId.eq(user_id))
                .filter(Expr::col(user_quotas::Column::UsedBytes).lt(delta))
                .exec(conn)
                .await?;
        }

        self.snapshots.remove(user_id);
        Ok(())
    }

    /// Current `(used, total)` for pre-admission checks, served from the
    /// snapshot cache when fresh.
    pub async fn current_usage(&self, user_id: &str) -> Result<(i64, i64), DbErr> {
        if let Some(snap) = self.snapshots.get(user_id).map(|s| *s) {
            if snap.fetched_at.elapsed() < self.snapshot_ttl {
                return Ok((snap.used, snap.total));
            }
        }

        self.ensure_row(&self.db, user_id).await?;
        let row = UserQuotas::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("user_quotas: {user_id}")))?;

        self.snapshots.insert(
            user_id.to_string(),
            Snapshot {
                used: row.used_bytes,
                total: row.total_bytes,
                fetched_at: Instant::now(),
            },
        );
        Ok((row.used_bytes, row.total_bytes))
    }

    /// Set a user's total allowance (administrative path).
    pub async fn grant(&self, user_id: &str, total_bytes: i64) -> Result<(), DbErr> {
        self.ensure_row(&self.db, user_id).await?;
        UserQuotas::update_many()
            .col_expr(user_quotas::Column::TotalBytes, Expr::value(total_bytes))
            .col_expr(
                user_quotas::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(user_quotas::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await?;
        self.snapshots.remove(user_id);
        Ok(())
    }

    /// Provision the accounting row on first touch with the default allowance.
    async fn ensure_row<C: ConnectionTrait>(&self, conn: &C, user_id: &str) -> Result<(), DbErr> {
        let row = user_quotas::ActiveModel {
            user_id: Set(user_id.to_string()),
            used_bytes: Set(0),
            total_bytes: Set(self.default_total),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        let insert = UserQuotas::insert(row).on_conflict(
            OnConflict::column(user_quotas::Column::UserId)
                .do_nothing()
                .to_owned(),
        );
        match insert.exec(conn).await {
            Ok(_) => Ok(()),
            Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
