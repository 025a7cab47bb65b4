use crate::entities::{prelude::*, *};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantReason {
    /// Free-download flag set, or price null/zero.
    Free,
    /// Caller owns the design.
    Owner,
    /// A completed purchase exists for (user, design).
    Purchased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Anonymous caller on a paid design.
    LoginRequired,
    /// Authenticated, but no completed purchase.
    PurchaseRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted(GrantReason),
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted(_))
    }
}

/// A failed resolution is not a denial: `Backend` means the checks could not
/// be completed and the caller may retry.
#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("design not found: {0}")]
    DesignNotFound(String),

    #[error("entitlement lookup failed: {0}")]
    Backend(#[from] DbErr),
}

/// Stateless download-permission resolver. No caching: every call re-queries
/// current state so a fresh purchase is honored on the next request.
pub struct EntitlementService {
    db: DatabaseConnection,
}

impl EntitlementService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Decides whether `user_id` (None = anonymous) may download `design_id`.
    ///
    /// Rules, first match wins:
    /// 1. unknown design -> DesignNotFound
    /// 2. free (flag or null/zero price) -> grant
    /// 3. anonymous -> deny
    /// 4. owner -> grant
    /// 5. completed purchase exists -> grant, else deny
    pub async fn resolve(
        &self,
        user_id: Option<&str>,
        design_id: &str,
    ) -> Result<AccessDecision, EntitlementError> {
        let design = Designs::find_by_id(design_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| EntitlementError::DesignNotFound(design_id.to_string()))?;

        if design.is_free() {
            return Ok(AccessDecision::Granted(GrantReason::Free));
        }

        let Some(user_id) = user_id else {
            return Ok(AccessDecision::Denied(DenyReason::LoginRequired));
        };

        if user_id == design.user_id {
            return Ok(AccessDecision::Granted(GrantReason::Owner));
        }

        if has_completed_purchase(&self.db, user_id, design_id).await? {
            Ok(AccessDecision::Granted(GrantReason::Purchased))
        } else {
            Ok(AccessDecision::Denied(DenyReason::PurchaseRequired))
        }
    }
}

/// Shared by the resolver, the webhook consumer, and the backfill job as the
/// duplicate pre-check before inserting a grant.
pub async fn has_completed_purchase(
    db: &DatabaseConnection,
    user_id: &str,
    design_id: &str,
) -> Result<bool, DbErr> {
    let existing = Purchases::find()
        .filter(purchases::Column::UserId.eq(user_id))
        .filter(purchases::Column::DesignId.eq(design_id))
        .filter(purchases::Column::Status.eq(purchases::STATUS_COMPLETED))
        .one(db)
        .await?;

    Ok(existing.is_some())
}
