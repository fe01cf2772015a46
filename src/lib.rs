pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::BrokerConfig;
use crate::services::proxy::ProxyUploadService;
use crate::services::reconcile::CompletionReconciler;
use crate::services::storage::StorageService;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::authorize::authorize_upload,
        api::handlers::callback::completion_callback,
        api::handlers::proxy::proxy_upload,
        api::handlers::objects::get_object,
        api::handlers::objects::delete_object,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::authorize::AuthorizeRequest,
            api::handlers::authorize::AuthorizeResponse,
            api::handlers::callback::CallbackResponse,
            api::handlers::proxy::ProxyUploadResponse,
            api::handlers::objects::DeleteObjectRequest,
            api::handlers::objects::ObjectReferenceResponse,
            api::handlers::health::HealthResponse,
            services::policy::PolicyRejection,
        )
    ),
    tags(
        (name = "uploads", description = "Upload authorization and completion endpoints"),
        (name = "objects", description = "Stored object reference endpoints"),
        (name = "system", description = "Health and diagnostics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn StorageService>,
    pub reconciler: Arc<CompletionReconciler>,
    pub proxy: Arc<ProxyUploadService>,
    pub config: BrokerConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        // Authenticated by the provider's signature, not a session token
        .route(
            "/uploads/callback",
            post(api::handlers::callback::completion_callback),
        )
        .route(
            "/uploads/authorize",
            post(api::handlers::authorize::authorize_upload).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/uploads/direct",
            post(api::handlers::proxy::proxy_upload)
                .layer(axum::extract::DefaultBodyLimit::max(
                    state.config.max_object_size as usize + 10 * 1024 * 1024, // Buffer for multipart overhead
                ))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/objects",
            axum::routing::delete(api::handlers::objects::delete_object).layer(
                from_fn_with_state(state.clone(), api::middleware::auth::auth_middleware),
            ),
        )
        .route(
            "/objects/:id",
            get(api::handlers::objects::get_object).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
