use crate::api::error::AppError;
use crate::api::middleware::auth::MaybeUser;
use crate::services::download::DownloadError;
use crate::services::entitlement::{AccessDecision, DenyReason, EntitlementError};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Extension,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct DownloadQuery {
    /// Optional explicit file path within the design
    pub file: Option<String>,
}

#[utoipa::path(
    get,
    path = "/designs/{id}/download",
    params(
        ("id" = String, Path, description = "Design ID"),
        ("file" = Option<String>, Query, description = "Specific file path to fetch")
    ),
    responses(
        (status = 200, description = "File bytes"),
        (status = 401, description = "Login required for a paid design"),
        (status = 403, description = "Purchase required"),
        (status = 404, description = "Design or file not found"),
        (status = 502, description = "Storage unavailable, retry")
    ),
    tag = "downloads"
)]
pub async fn download_design(
    State(state): State<crate::AppState>,
    Extension(MaybeUser(claims)): Extension<MaybeUser>,
    Path(design_id): Path<String>,
    Query(params): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let user_id = claims.as_ref().map(|c| c.sub.as_str());

    // Denials and lookup failures stay distinct: a backend fault is 500,
    // never a 401/403 the UI would turn into an upsell prompt.
    let decision = state
        .entitlements
        .resolve(user_id, &design_id)
        .await
        .map_err(|e| match e {
            EntitlementError::DesignNotFound(_) => {
                AppError::NotFound("Design not found".to_string())
            }
            EntitlementError::Backend(err) => {
                AppError::Internal(format!("Entitlement check failed: {}", err))
            }
        })?;

    let reason = match decision {
        AccessDecision::Granted(reason) => reason,
        AccessDecision::Denied(DenyReason::LoginRequired) => {
            return Err(AppError::Unauthorized(
                "Login required to download this design".to_string(),
            ));
        }
        AccessDecision::Denied(DenyReason::PurchaseRequired) => {
            return Err(AppError::Forbidden(
                "Purchase required to download this design".to_string(),
            ));
        }
    };

    let file = state
        .downloads
        .execute(&design_id, params.file.as_deref(), user_id, reason)
        .await
        .map_err(|e| match e {
            DownloadError::FileNotFound(_) => {
                AppError::NotFound("File not found for this design".to_string())
            }
            DownloadError::Storage(err) => AppError::Storage(err.to_string()),
        })?;

    tracing::info!(
        "⬇️  Download design={} file={} user={}",
        design_id,
        file.file_name,
        user_id.unwrap_or("anonymous")
    );

    let content_disposition = attachment_disposition(&file.file_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .body(Body::from(file.bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// RFC 6266 disposition with an ASCII fallback for legacy clients.
fn attachment_disposition(file_name: &str) -> String {
    let ascii_name = file_name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback = if ascii_name.is_empty() {
        "file"
    } else {
        &ascii_name
    };

    let encoded = utf8_percent_encode(file_name, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_ascii() {
        let d = attachment_disposition("poster.zip");
        assert!(d.contains("filename=\"poster.zip\""));
    }

    #[test]
    fn test_disposition_non_ascii_falls_back() {
        let d = attachment_disposition("плакат.zip");
        assert!(d.contains("filename=\".zip\""));
        assert!(d.contains("filename*=UTF-8''"));
    }
}
