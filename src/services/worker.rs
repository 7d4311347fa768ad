use crate::entities::prelude::*;
use crate::entities::transfer_jobs;
use crate::models::JobStatus;
use crate::services::transfer_service::TransferService;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time::sleep;
use tracing::{error, info};

/// Dequeues transfer jobs from the outbox and drives the post-processing
/// pipeline. The orchestrator nudges the worker through `wake` right after a
/// commit; polling is the fallback for missed nudges and for jobs left over
/// from a previous run.
pub struct TransferWorker {
    db: DatabaseConnection,
    transfer: Arc<TransferService>,
    wake: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
}

impl TransferWorker {
    pub fn new(
        db: DatabaseConnection,
        transfer: Arc<TransferService>,
        wake: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            transfer,
            wake,
            shutdown,
            poll_interval,
        }
    }

    pub async fn run(mut self) {
        info!("🚀 Transfer worker started");

        loop {
            self.drain_pending().await;

            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("🛑 Transfer worker shutting down");
                    break;
                }
                _ = self.wake.notified() => {}
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    /// Claim and process jobs until the queue is empty.
    pub async fn drain_pending(&self) {
        loop {
            let job = match self.claim_next().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!("failed to claim transfer job: {e}");
                    break;
                }
            };

            let outcome = self.transfer.process(&job).await;
            let status = match &outcome {
                Ok(()) => JobStatus::Done,
                Err(e) => {
                    error!(job_id = %job.id, "transfer job failed: {e}");
                    JobStatus::Failed
                }
            };
            if let Err(e) = self.mark(&job, status).await {
                error!(job_id = %job.id, "failed to mark transfer job: {e}");
            }
        }
    }

    /// Oldest pending job, claimed with a conditional Pending -> Running
    /// update so concurrent workers (or duplicate wakes) never run the same
    /// job twice.
    async fn claim_next(&self) -> Result<Option<transfer_jobs::Model>, DbErr> {
        loop {
            let Some(job) = TransferJobs::find()
                .filter(transfer_jobs::Column::Status.eq(JobStatus::Pending))
                .order_by_asc(transfer_jobs::Column::CreatedAt)
                .one(&self.db)
                .await?
            else {
                return Ok(None);
            };

            let claimed = TransferJobs::update_many()
                .col_expr(
                    transfer_jobs::Column::Status,
                    Expr::value(JobStatus::Running),
                )
                .filter(transfer_jobs::Column::Id.eq(job.id.clone()))
                .filter(transfer_jobs::Column::Status.eq(JobStatus::Pending))
                .exec(&self.db)
                .await?;

            if claimed.rows_affected == 1 {
                return Ok(Some(job));
            }
            // Lost the claim race; try the next one.
        }
    }

    async fn mark(&self, job: &transfer_jobs::Model, status: JobStatus) -> Result<(), DbErr> {
        TransferJobs::update_many()
            .col_expr(transfer_jobs::Column::Status, Expr::value(status))
            .filter(transfer_jobs::Column::Id.eq(job.id.clone()))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
