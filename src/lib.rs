pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::MarketConfig;
use crate::services::download::DownloadService;
use crate::services::entitlement::EntitlementService;
use crate::services::storage::StorageService;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::designs::list_designs,
        api::handlers::designs::get_design,
        api::handlers::designs::create_design,
        api::handlers::designs::update_design,
        api::handlers::designs::delete_design,
        api::handlers::download::download_design,
        api::handlers::purchases::list_purchases,
        api::handlers::purchases::payment_webhook,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::auth::AuthRequest,
            api::handlers::auth::AuthResponse,
            api::handlers::designs::DesignResponse,
            api::handlers::designs::DesignFileResponse,
            api::handlers::designs::DesignDetailResponse,
            api::handlers::designs::UpdateDesignRequest,
            api::handlers::purchases::PurchaseResponse,
            api::handlers::purchases::PaymentWebhookEvent,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "auth", description = "Authentication endpoints"),
        (name = "designs", description = "Design marketplace CRUD"),
        (name = "downloads", description = "Entitlement-gated downloads"),
        (name = "purchases", description = "Purchase ledger and payment webhook")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn StorageService>,
    pub entitlements: Arc<EntitlementService>,
    pub downloads: Arc<DownloadService>,
    pub config: MarketConfig,
}

impl AppState {
    /// Wires the resolver and execution services from their dependencies.
    /// Everything is injected; no shared global client anywhere.
    pub fn new(db: DatabaseConnection, storage: Arc<dyn StorageService>, config: MarketConfig) -> Self {
        let entitlements = Arc::new(EntitlementService::new(db.clone()));
        let downloads = Arc::new(DownloadService::new(
            db.clone(),
            storage.clone(),
            config.default_currency.clone(),
        ));

        Self {
            db,
            storage,
            entitlements,
            downloads,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/register", post(api::handlers::auth::register))
        .route("/login", post(api::handlers::auth::login))
        .route(
            "/designs",
            get(api::handlers::designs::list_designs).merge(
                post(api::handlers::designs::create_design)
                    .layer(axum::extract::DefaultBodyLimit::max(
                        state.config.max_upload_size + 10 * 1024 * 1024,
                    ))
                    .layer(from_fn_with_state(
                        state.clone(),
                        api::middleware::auth::auth_middleware,
                    )),
            ),
        )
        .route(
            "/designs/:id",
            get(api::handlers::designs::get_design).merge(
                axum::routing::put(api::handlers::designs::update_design)
                    .delete(api::handlers::designs::delete_design)
                    .layer(from_fn_with_state(
                        state.clone(),
                        api::middleware::auth::auth_middleware,
                    )),
            ),
        )
        .route(
            "/designs/:id/download",
            get(api::handlers::download::download_design).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::optional_auth_middleware,
            )),
        )
        .route(
            "/purchases",
            get(api::handlers::purchases::list_purchases).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/webhooks/payment",
            post(api::handlers::purchases::payment_webhook),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
