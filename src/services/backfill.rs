use crate::entities::{prelude::*, *};
use crate::services::entitlement::has_completed_purchase;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Offline reconciliation of historical download counters into the purchase
/// ledger, so the resolver's purchase lookup is complete for data that
/// predates the ledger.
///
/// Strategy: owner-derived. Each free design with a positive counter gets
/// one zero-amount completed grant for its owner. Paid designs are skipped
/// entirely; historical paid downloads are never retroactively granted.
pub struct BackfillService {
    db: DatabaseConnection,
    default_currency: String,
}

impl BackfillService {
    pub fn new(db: DatabaseConnection, default_currency: String) -> Self {
        Self {
            db,
            default_currency,
        }
    }

    /// Idempotent and safely re-runnable: pairs already reconciled are
    /// skipped, and a single row's failure never aborts the batch. Errors
    /// out only when the candidate set itself cannot be enumerated.
    pub async fn run(&self, dry_run: bool) -> Result<BackfillReport, DbErr> {
        let candidates = Designs::find()
            .filter(designs::Column::Downloads.gt(0))
            .filter(
                Condition::any()
                    .add(designs::Column::PriceCents.is_null())
                    .add(designs::Column::PriceCents.eq(0)),
            )
            .order_by_asc(designs::Column::CreatedAt)
            .all(&self.db)
            .await?;

        tracing::info!("Backfill: {} candidate designs", candidates.len());

        let mut report = BackfillReport::default();

        for design in candidates {
            match self.reconcile(&design, dry_run).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        target: "backfill",
                        design_id = %design.id,
                        user_id = %design.user_id,
                        "Failed to reconcile: {}",
                        e
                    );
                }
            }
        }

        tracing::info!(
            "Backfill finished: {} created, {} skipped, {} failed",
            report.created,
            report.skipped,
            report.failed
        );

        Ok(report)
    }

    /// Returns true when a grant was (or, in dry-run, would be) created.
    async fn reconcile(&self, design: &designs::Model, dry_run: bool) -> Result<bool, DbErr> {
        if has_completed_purchase(&self.db, &design.user_id, &design.id).await? {
            return Ok(false);
        }

        if dry_run {
            tracing::info!(
                "Dry run: would create grant for user={} design={}",
                design.user_id,
                design.id
            );
            return Ok(true);
        }

        // Earliest download evidence wins as the grant timestamp.
        let created_at = DownloadEvents::find()
            .filter(download_events::Column::DesignId.eq(&design.id))
            .order_by_asc(download_events::Column::CreatedAt)
            .one(&self.db)
            .await?
            .map(|e| e.created_at)
            .unwrap_or_else(Utc::now);

        let currency = if design.currency.is_empty() {
            self.default_currency.clone()
        } else {
            design.currency.clone()
        };

        purchases::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(design.user_id.clone()),
            design_id: Set(design.id.clone()),
            amount_cents: Set(0),
            currency: Set(currency),
            status: Set(purchases::STATUS_COMPLETED.to_string()),
            session_id: Set(None),
            created_at: Set(created_at),
        }
        .insert(&self.db)
        .await?;

        Ok(true)
    }
}
