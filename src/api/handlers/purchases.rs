use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::services::entitlement::has_completed_purchase;
use crate::utils::auth::Claims;
use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Extension, Json};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, ToSchema)]
pub struct PurchaseResponse {
    pub id: String,
    pub design_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[utoipa::path(
    get,
    path = "/purchases",
    responses(
        (status = 200, description = "Caller's purchase history", body = [PurchaseResponse]),
        (status = 401, description = "Unauthorized")
    ),
    security(("jwt" = [])),
    tag = "purchases"
)]
pub async fn list_purchases(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<PurchaseResponse>>, AppError> {
    let purchases = Purchases::find()
        .filter(purchases::Column::UserId.eq(&claims.sub))
        .order_by_desc(purchases::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(
        purchases
            .into_iter()
            .map(|p| PurchaseResponse {
                id: p.id,
                design_id: p.design_id,
                amount_cents: p.amount_cents,
                currency: p.currency,
                status: p.status,
                created_at: p.created_at,
            })
            .collect(),
    ))
}

#[derive(Deserialize, ToSchema)]
pub struct PaymentWebhookEvent {
    /// Event type; only "checkout.session.completed" creates a grant
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub user_id: String,
    pub design_id: String,
    pub amount_cents: i64,
    pub currency: Option<String>,
}

/// Payment-provider callback. The provider did the charging; this endpoint
/// only records the resulting ledger row the resolver consults.
#[utoipa::path(
    post,
    path = "/webhooks/payment",
    request_body = PaymentWebhookEvent,
    responses(
        (status = 200, description = "Event processed or ignored"),
        (status = 401, description = "Bad signature"),
        (status = 404, description = "Unknown design")
    ),
    tag = "purchases"
)]
pub async fn payment_webhook(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized("Missing signature".to_string()))?;

    verify_signature(&state.config.webhook_secret, &body, signature)?;

    let event: PaymentWebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    if event.event_type != "checkout.session.completed" {
        tracing::debug!("Ignoring webhook event type {}", event.event_type);
        return Ok(StatusCode::OK);
    }

    let design = Designs::find_by_id(&event.design_id)
        .one(&state.db)
        .await?
        .ok_or(AppError::NotFound("Unknown design".to_string()))?;

    // Providers redeliver; both checks make reprocessing a no-op.
    let already_recorded = Purchases::find()
        .filter(purchases::Column::SessionId.eq(&event.session_id))
        .one(&state.db)
        .await?
        .is_some();

    if already_recorded || has_completed_purchase(&state.db, &event.user_id, &event.design_id).await? {
        tracing::info!(
            "Webhook session {} already recorded, skipping",
            event.session_id
        );
        return Ok(StatusCode::OK);
    }

    purchases::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        user_id: Set(event.user_id.clone()),
        design_id: Set(event.design_id.clone()),
        amount_cents: Set(event.amount_cents),
        currency: Set(event.currency.unwrap_or(design.currency)),
        status: Set(purchases::STATUS_COMPLETED.to_string()),
        session_id: Set(Some(event.session_id)),
        created_at: Set(Utc::now()),
    }
    .insert(&state.db)
    .await?;

    tracing::info!(
        "💳 Purchase recorded: user={} design={}",
        event.user_id,
        event.design_id
    );

    Ok(StatusCode::OK)
}

fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> Result<(), AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    mac.update(body);

    let provided = hex::decode(signature_hex)
        .map_err(|_| AppError::Unauthorized("Malformed signature".to_string()))?;

    mac.verify_slice(&provided)
        .map_err(|_| AppError::Unauthorized("Invalid signature".to_string()))
}

/// Test helper mirroring what the payment provider computes.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let sig = sign_payload("secret", b"payload");
        assert!(verify_signature("secret", b"payload", &sig).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign_payload("secret", b"payload");
        assert!(verify_signature("secret", b"tampered", &sig).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign_payload("other", b"payload");
        assert!(verify_signature("secret", b"payload", &sig).is_err());
    }
}
