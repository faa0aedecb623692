use crate::auth::RequireAuth;
use crate::sync::SyncState;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, post},
};
use scribe_core::{DocumentAttribute, DocumentSnapshot, DocumentStore, DocumentSummary, NewDocument};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::ErrorResponse;

/// Shared state for document handlers
#[derive(Clone)]
pub struct DocumentsState {
    pub store: Arc<dyn DocumentStore>,
    pub sync: SyncState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search_query: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    pub document_id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCollaboratorsRequest {
    pub document_id: String,
    #[serde(rename = "readAccess", default)]
    pub read_access: BTreeSet<String>,
    #[serde(rename = "writeAccess", default)]
    pub write_access: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentSummary>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub message: String,
    pub document_id: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// What a caller needs to be allowed to do with a document
#[derive(Debug, Clone, Copy)]
enum Permission {
    Read,
    Write,
    Own,
}

/// Create document routes
pub fn document_routes(state: DocumentsState) -> Router {
    Router::new()
        .route("/getall", post(get_all_documents))
        .route("/search", post(search_documents))
        .route("/createnew", post(create_document))
        .route("/getone/{id}", post(get_one_document))
        .route("/updatetitle", post(update_title))
        .route("/updatecollaborators", post(update_collaborators))
        .route("/delete/{id}", delete(delete_document))
        .with_state(state)
}

/// POST /documents/getall - Documents the caller can open
async fn get_all_documents(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
) -> Response {
    match state.store.find_accessible(auth.identity(), None) {
        Ok(documents) => Json(DocumentsResponse { documents }).into_response(),
        Err(e) => {
            error!("Failed to list documents for {}: {}", auth.identity(), e);
            ErrorResponse::internal("Failed to fetch documents")
        }
    }
}

/// POST /documents/search - Title search over the caller's documents
async fn search_documents(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<SearchRequest>,
) -> Response {
    match state
        .store
        .find_accessible(auth.identity(), Some(body.search_query.trim()))
    {
        Ok(documents) => Json(DocumentsResponse { documents }).into_response(),
        Err(e) => {
            error!("Failed to search documents: {}", e);
            ErrorResponse::internal("Failed to search documents")
        }
    }
}

/// POST /documents/createnew - Create a document owned by the caller
async fn create_document(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
    Json(mut document): Json<NewDocument>,
) -> Response {
    document.author = auth.identity().to_string();

    match state.store.insert(document) {
        Ok(document_id) => {
            info!("{} created document {}", auth.identity(), document_id);
            (
                StatusCode::CREATED,
                Json(CreatedResponse {
                    message: "Document created successfully".to_string(),
                    document_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to create document: {}", e);
            ErrorResponse::internal("Failed to create document")
        }
    }
}

/// POST /documents/getone/{id} - Read one document, from the cache when hot
async fn get_one_document(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<String>,
) -> Response {
    match authorize(&state, &id, auth.identity(), Permission::Read).await {
        Ok(document) => Json(document).into_response(),
        Err(response) => response,
    }
}

/// POST /documents/updatetitle
async fn update_title(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<UpdateTitleRequest>,
) -> Response {
    if body.document_id.is_empty() {
        return ErrorResponse::response(StatusCode::BAD_REQUEST, "ID is required");
    }
    let title = body.title.trim();
    if title.is_empty() {
        return ErrorResponse::response(StatusCode::BAD_REQUEST, "Title is required");
    }
    if let Err(response) =
        authorize(&state, &body.document_id, auth.identity(), Permission::Write).await
    {
        return response;
    }

    let attribute = DocumentAttribute::Title(title.to_string());
    dispatch(&state, &body.document_id, &attribute, "Document title updated successfully").await
}

/// POST /documents/updatecollaborators - Replace both access lists (author only)
async fn update_collaborators(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<UpdateCollaboratorsRequest>,
) -> Response {
    if body.document_id.is_empty() {
        return ErrorResponse::response(StatusCode::BAD_REQUEST, "ID is required");
    }
    if body.read_access.is_empty() || body.write_access.is_empty() {
        return ErrorResponse::response(StatusCode::BAD_REQUEST, "Access is required");
    }
    if let Err(response) =
        authorize(&state, &body.document_id, auth.identity(), Permission::Own).await
    {
        return response;
    }

    let attribute = DocumentAttribute::access(body.read_access, body.write_access);
    dispatch(&state, &body.document_id, &attribute, "Document access updated successfully").await
}

/// DELETE /documents/delete/{id} - Delete a document and end its live sessions
async fn delete_document(
    State(state): State<DocumentsState>,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &id, auth.identity(), Permission::Own).await {
        return response;
    }

    match state.sync.sessions.delete_document(&id).await {
        Ok(true) => {
            info!("{} deleted document {}", auth.identity(), id);
            Json(MessageResponse {
                message: "Document deleted successfully".to_string(),
            })
            .into_response()
        }
        Ok(false) => ErrorResponse::response(StatusCode::NOT_FOUND, "Document not found"),
        Err(e) => {
            error!("Failed to delete document {}: {}", id, e);
            ErrorResponse::internal("Failed to delete document")
        }
    }
}

async fn dispatch(
    state: &DocumentsState,
    document_id: &str,
    attribute: &DocumentAttribute,
    success: &str,
) -> Response {
    match state
        .sync
        .sessions
        .dispatch_attribute_update(document_id, attribute)
        .await
    {
        Ok(true) => Json(MessageResponse {
            message: success.to_string(),
        })
        .into_response(),
        Ok(false) => ErrorResponse::response(StatusCode::NOT_FOUND, "Document not found"),
        Err(e) => {
            error!(
                "Failed to update {} of document {}: {}",
                attribute.field(),
                document_id,
                e
            );
            ErrorResponse::internal("Failed to update document")
        }
    }
}

/// Load a document and check that `identity` holds `permission` on it
async fn authorize(
    state: &DocumentsState,
    document_id: &str,
    identity: &str,
    permission: Permission,
) -> Result<DocumentSnapshot, Response> {
    let document = match state.sync.sessions.read_document(document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            return Err(ErrorResponse::response(
                StatusCode::NOT_FOUND,
                "Document not found",
            ));
        }
        Err(e) => {
            error!("Failed to load document {}: {}", document_id, e);
            return Err(ErrorResponse::internal("Failed to load document"));
        }
    };

    let allowed = match permission {
        Permission::Read => document.can_read(identity),
        Permission::Write => document.can_write(identity),
        Permission::Own => document.author == identity,
    };
    if !allowed {
        warn!(
            "{} denied {:?} access to document {}",
            identity, permission, document_id
        );
        return Err(ErrorResponse::response(StatusCode::FORBIDDEN, "Access denied"));
    }
    Ok(document)
}
