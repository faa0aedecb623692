use crate::auth::{CredentialError, CredentialService, RequireAuth};
use crate::db::AuthRepo;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::ErrorResponse;

/// Shared state for auth handlers
#[derive(Clone)]
pub struct AuthState {
    pub credentials: Arc<CredentialService>,
    pub repo: Arc<AuthRepo>,
}

/// Request body for signup
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default, alias = "fullName", alias = "fullname")]
    pub full_name: String,
    pub email: String,
    pub password: String,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// User info in responses
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
    pub session_expires_at: String,
}

/// Create auth routes
pub fn auth_routes(state: AuthState) -> Router {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .with_state(state)
}

/// POST /auth/signup - Create an account
async fn signup(
    State(state): State<AuthState>,
    Json(body): Json<SignupRequest>,
) -> impl IntoResponse {
    match state
        .credentials
        .signup(&body.full_name, &body.email, &body.password)
    {
        Ok(user_id) => {
            info!("User signed up: {}", user_id);
            (
                StatusCode::OK,
                Json(MessageResponse {
                    message: "User created successfully".to_string(),
                }),
            )
                .into_response()
        }
        Err(e @ CredentialError::EmailTaken) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e @ CredentialError::InvalidInput(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Signup failed: {}", e);
            ErrorResponse::internal("Failed to create user")
        }
    }
}

/// POST /auth/login - Exchange credentials for a bearer token
async fn login(
    State(state): State<AuthState>,
    Json(body): Json<LoginRequest>,
) -> impl IntoResponse {
    match state.credentials.login(&body.email, &body.password) {
        Ok(result) => {
            info!("User logged in: {}", result.email);
            Json(LoginResponse {
                token: result.session_token,
            })
            .into_response()
        }
        Err(CredentialError::InvalidCredentials | CredentialError::InvalidInput(_)) => {
            warn!("Rejected login for {}", body.email.trim());
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid credentials".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Login failed: {}", e);
            ErrorResponse::internal("Failed to log in")
        }
    }
}

/// POST /auth/logout - Revoke the current token
async fn logout(
    State(state): State<AuthState>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    if let Err(e) = state.repo.delete_session(&auth.session.token) {
        error!("Failed to delete session: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!("User logged out: {}", auth.user.email);
    StatusCode::NO_CONTENT.into_response()
}

/// GET /auth/me - Current user info
async fn get_current_user(RequireAuth(auth): RequireAuth) -> impl IntoResponse {
    Json(MeResponse {
        user: UserResponse {
            id: auth.user.id,
            email: auth.user.email,
            full_name: auth.user.full_name,
        },
        session_expires_at: auth.session.expires_at.to_rfc3339(),
    })
}
