use crate::auth::RequireAuth;
use crate::sync::{Session, SessionRefused, SyncState};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::ErrorResponse;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub document_id: String,
    /// Auth token (optional in query, can also use header)
    pub token: Option<String>,
}

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub sync: SyncState,
}

/// GET /documents/handler - Join a document's live editing session.
///
/// The session is opened before the upgrade, so a refused join is answered
/// with a plain HTTP status instead of a socket that closes immediately.
pub async fn ws_handler(
    State(state): State<WsState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match state
        .sync
        .sessions
        .open_session(&query.document_id, auth.identity())
        .await
    {
        Ok(session) => session,
        Err(SessionRefused::NotFound(id)) => {
            warn!("WebSocket rejected: document {} not found", id);
            return ErrorResponse::response(StatusCode::NOT_FOUND, "Document not found");
        }
        Err(e @ SessionRefused::Forbidden { .. }) => {
            warn!("WebSocket rejected: {}", e);
            return ErrorResponse::response(StatusCode::FORBIDDEN, "Access denied");
        }
        Err(e) => {
            error!("WebSocket rejected: {}", e);
            return ErrorResponse::internal("Failed to open document");
        }
    };

    info!(
        "WebSocket upgrade: user={}, document={}",
        auth.user.email, query.document_id
    );

    // A failed upgrade drops the session, which releases its room slot
    ws.on_upgrade(move |socket| handle_socket(socket, session))
        .into_response()
}

/// Drive an established WebSocket until either side closes it
async fn handle_socket(socket: WebSocket, mut session: Session) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let connection = session.connection().clone();

    info!(
        "WebSocket connected: {} on {} as {}",
        connection.id(),
        connection.document_id(),
        connection.identity()
    );

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        relay(&session, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => relay(&session, text).await,
                        Err(_) => warn!("Dropped non-UTF-8 frame from {}", connection.id()),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", connection.id(), e);
                        break;
                    }
                    None => break,
                }
            }

            frame = session.next_outbound() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_tx.send(Message::Text(frame.as_str().into())).await {
                    error!("Failed to send change to {}: {}", connection.id(), e);
                    break;
                }
            }

            _ = connection.close_requested() => {
                debug!("Server closing {}", connection.id());
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    session.close().await;
    info!(
        "WebSocket disconnected: {} on {}",
        connection.id(),
        connection.document_id()
    );
}

async fn relay(session: &Session, text: &str) {
    match session.handle_message(text).await {
        Ok(_) => {}
        Err(e) if e.is_dropped_message() => {
            warn!("Dropped message from {}: {}", session.connection().id(), e);
        }
        Err(e) => error!(
            "Failed to handle message from {}: {}",
            session.connection().id(),
            e
        ),
    }
}
