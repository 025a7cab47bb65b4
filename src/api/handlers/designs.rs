use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::utils::auth::Claims;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub struct DesignResponse {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: String,
    pub free_download: bool,
    pub downloads: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<designs::Model> for DesignResponse {
    fn from(m: designs::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            title: m.title,
            description: m.description,
            price_cents: m.price_cents,
            currency: m.currency,
            free_download: m.free_download,
            downloads: m.downloads,
            created_at: m.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DesignFileResponse {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub display_order: i32,
}

#[derive(Serialize, ToSchema)]
pub struct DesignDetailResponse {
    pub design: DesignResponse,
    pub files: Vec<DesignFileResponse>,
}

#[derive(Deserialize)]
pub struct ListDesignsQuery {
    /// Only designs downloadable without purchase
    pub free_only: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/designs",
    responses(
        (status = 200, description = "Browse designs, newest first", body = [DesignResponse])
    ),
    tag = "designs"
)]
pub async fn list_designs(
    State(state): State<crate::AppState>,
    Query(params): Query<ListDesignsQuery>,
) -> Result<Json<Vec<DesignResponse>>, AppError> {
    let mut query = Designs::find().order_by_desc(designs::Column::CreatedAt);

    if params.free_only.unwrap_or(false) {
        query = query.filter(
            sea_orm::Condition::any()
                .add(designs::Column::FreeDownload.eq(true))
                .add(designs::Column::PriceCents.is_null())
                .add(designs::Column::PriceCents.eq(0)),
        );
    }

    let designs = query
        .limit(params.limit.unwrap_or(50).min(200))
        .offset(params.offset.unwrap_or(0))
        .all(&state.db)
        .await?;

    Ok(Json(designs.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/designs/{id}",
    params(
        ("id" = String, Path, description = "Design ID")
    ),
    responses(
        (status = 200, description = "Design with its files", body = DesignDetailResponse),
        (status = 404, description = "Design not found")
    ),
    tag = "designs"
)]
pub async fn get_design(
    State(state): State<crate::AppState>,
    Path(design_id): Path<String>,
) -> Result<Json<DesignDetailResponse>, AppError> {
    let design = Designs::find_by_id(&design_id)
        .one(&state.db)
        .await?
        .ok_or(AppError::NotFound("Design not found".to_string()))?;

    let files = DesignFiles::find()
        .filter(design_files::Column::DesignId.eq(&design_id))
        .order_by_asc(design_files::Column::DisplayOrder)
        .all(&state.db)
        .await?;

    Ok(Json(DesignDetailResponse {
        design: design.into(),
        files: files
            .into_iter()
            .map(|f| DesignFileResponse {
                id: f.id,
                file_path: f.file_path,
                file_name: f.file_name,
                display_order: f.display_order,
            })
            .collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/designs",
    responses(
        (status = 201, description = "Design created", body = DesignDetailResponse),
        (status = 400, description = "Missing title or files"),
        (status = 401, description = "Unauthorized")
    ),
    security(("jwt" = [])),
    tag = "designs"
)]
pub async fn create_design(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DesignDetailResponse>), AppError> {
    let design_id = Uuid::new_v4().to_string();

    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut price_cents: Option<i64> = None;
    let mut currency = state.config.default_currency.clone();
    let mut free_download = false;
    let mut uploaded: Vec<(String, String)> = Vec::new(); // (file_path, file_name)

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart payload: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                )
            }
            "description" => {
                description = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                )
            }
            "price_cents" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let parsed: i64 = raw
                    .parse()
                    .map_err(|_| AppError::BadRequest("Invalid price_cents".to_string()))?;
                if parsed < 0 {
                    return Err(AppError::BadRequest(
                        "price_cents must not be negative".to_string(),
                    ));
                }
                price_cents = Some(parsed);
            }
            "currency" => {
                currency = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?
            }
            "free_download" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                free_download = raw == "true" || raw == "1";
            }
            "file" => {
                let file_name = field
                    .file_name()
                    .map(sanitize_file_name)
                    .filter(|n| !n.is_empty())
                    .ok_or(AppError::BadRequest("File part needs a name".to_string()))?;

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;

                let file_path = format!("designs/{}/{}", design_id, file_name);
                state
                    .storage
                    .store(&file_path, data.to_vec())
                    .await
                    .map_err(|e| AppError::Storage(e.to_string()))?;

                uploaded.push((file_path, file_name));
            }
            other => {
                tracing::debug!("Ignoring unknown multipart field: {}", other);
            }
        }
    }

    let title = title
        .filter(|t| !t.trim().is_empty())
        .ok_or(AppError::BadRequest("Title is required".to_string()))?;
    if uploaded.is_empty() {
        return Err(AppError::BadRequest(
            "At least one file is required".to_string(),
        ));
    }

    let primary_path = uploaded[0].0.clone();

    let design = designs::ActiveModel {
        id: Set(design_id.clone()),
        user_id: Set(claims.sub.clone()),
        title: Set(title),
        description: Set(description),
        price_cents: Set(price_cents),
        currency: Set(currency),
        free_download: Set(free_download),
        downloads: Set(0),
        file_path: Set(Some(primary_path)),
        created_at: Set(Utc::now()),
    }
    .insert(&state.db)
    .await?;

    let mut files = Vec::new();
    for (order, (file_path, file_name)) in uploaded.into_iter().enumerate() {
        let file = design_files::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            design_id: Set(design_id.clone()),
            file_path: Set(file_path),
            file_name: Set(file_name),
            display_order: Set(order as i32),
            created_at: Set(Utc::now()),
        }
        .insert(&state.db)
        .await?;

        files.push(DesignFileResponse {
            id: file.id,
            file_path: file.file_path,
            file_name: file.file_name,
            display_order: file.display_order,
        });
    }

    tracing::info!("🎨 Design {} created by {}", design_id, claims.sub);

    Ok((
        StatusCode::CREATED,
        Json(DesignDetailResponse {
            design: design.into(),
            files,
        }),
    ))
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateDesignRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub free_download: Option<bool>,
}

#[utoipa::path(
    put,
    path = "/designs/{id}",
    request_body = UpdateDesignRequest,
    params(
        ("id" = String, Path, description = "Design ID")
    ),
    responses(
        (status = 200, description = "Design updated", body = DesignResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Design not found")
    ),
    security(("jwt" = [])),
    tag = "designs"
)]
pub async fn update_design(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(design_id): Path<String>,
    Json(payload): Json<UpdateDesignRequest>,
) -> Result<Json<DesignResponse>, AppError> {
    let design = Designs::find_by_id(&design_id)
        .one(&state.db)
        .await?
        .ok_or(AppError::NotFound("Design not found".to_string()))?;

    if design.user_id != claims.sub {
        return Err(AppError::Forbidden(
            "Only the owner may edit a design".to_string(),
        ));
    }

    if payload.price_cents.is_some_and(|p| p < 0) {
        return Err(AppError::BadRequest(
            "price_cents must not be negative".to_string(),
        ));
    }

    let mut active: designs::ActiveModel = design.into();
    if let Some(title) = payload.title {
        active.title = Set(title);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price_cents) = payload.price_cents {
        active.price_cents = Set(Some(price_cents));
    }
    if let Some(currency) = payload.currency {
        active.currency = Set(currency);
    }
    if let Some(free_download) = payload.free_download {
        active.free_download = Set(free_download);
    }

    let updated = active.update(&state.db).await?;

    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/designs/{id}",
    params(
        ("id" = String, Path, description = "Design ID")
    ),
    responses(
        (status = 204, description = "Design deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Design not found")
    ),
    security(("jwt" = [])),
    tag = "designs"
)]
pub async fn delete_design(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(design_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let design = Designs::find_by_id(&design_id)
        .one(&state.db)
        .await?
        .ok_or(AppError::NotFound("Design not found".to_string()))?;

    if design.user_id != claims.sub {
        return Err(AppError::Forbidden(
            "Only the owner may delete a design".to_string(),
        ));
    }

    let files = DesignFiles::find()
        .filter(design_files::Column::DesignId.eq(&design_id))
        .all(&state.db)
        .await?;

    // Rows first, then best-effort object deletion.
    DesignFiles::delete_many()
        .filter(design_files::Column::DesignId.eq(&design_id))
        .exec(&state.db)
        .await?;
    DownloadEvents::delete_many()
        .filter(download_events::Column::DesignId.eq(&design_id))
        .exec(&state.db)
        .await?;
    Purchases::delete_many()
        .filter(purchases::Column::DesignId.eq(&design_id))
        .exec(&state.db)
        .await?;
    Designs::delete_by_id(&design_id).exec(&state.db).await?;

    for file in files {
        if let Err(e) = state.storage.delete(&file.file_path).await {
            tracing::error!(
                target: "bookkeeping",
                "Failed to delete object {}: {}",
                file.file_path,
                e
            );
        }
    }

    tracing::info!("🗑️  Design {} deleted by {}", design_id, claims.sub);

    Ok(StatusCode::NO_CONTENT)
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\')
        .take(128)
        .collect()
}
