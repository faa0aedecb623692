pub mod api;
pub mod auth;
pub mod documents;
pub mod ws;

pub use api::api_routes;
pub use auth::auth_routes;
pub use documents::document_routes;
pub use ws::ws_handler;

use crate::auth::{AuthExtractor, CredentialService};
use crate::config::Config;
use crate::db::AuthRepo;
use crate::sync::SyncState;
use axum::{
    Router,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use scribe_core::DocumentStore;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn response(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(ErrorResponse {
                error: message.into(),
            }),
        )
            .into_response()
    }

    pub fn internal(message: impl Into<String>) -> Response {
        Self::response(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// Assemble every route of the server.
///
/// Middleware that depends on deployment (CORS, tracing) is layered on by
/// the binary.
pub fn build_router(
    config: Arc<Config>,
    repo: Arc<AuthRepo>,
    store: Arc<dyn DocumentStore>,
    sync: SyncState,
) -> Router {
    let auth_state = auth::AuthState {
        credentials: Arc::new(CredentialService::new(repo.clone(), config)),
        repo: repo.clone(),
    };
    let documents_state = documents::DocumentsState {
        store,
        sync: sync.clone(),
    };
    let ws_state = ws::WsState { sync: sync.clone() };
    let api_state = api::ApiState { sync };

    let documents = document_routes(documents_state)
        .route("/handler", get(ws_handler).with_state(ws_state));

    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "UP" })) }))
        .nest("/auth", auth_routes(auth_state))
        .nest("/documents", documents)
        .nest("/api", api_routes(api_state))
        .layer(Extension(AuthExtractor::new(repo)))
}
