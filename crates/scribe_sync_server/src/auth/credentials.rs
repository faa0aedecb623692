use crate::config::Config;
use crate::db::AuthRepo;
use chrono::{Duration, Utc};
use scribe_core::normalize_identity;
use std::sync::Arc;

/// Password signup and login service
pub struct CredentialService {
    repo: Arc<AuthRepo>,
    config: Arc<Config>,
}

/// Result of a successful login
#[derive(Debug)]
pub struct LoginResult {
    pub session_token: String,
    pub user_id: String,
    pub email: String,
}

/// Error types for credential operations
#[derive(Debug)]
pub enum CredentialError {
    /// Unknown email or wrong password
    InvalidCredentials,
    /// An account already exists for this email
    EmailTaken,
    /// Malformed signup or login input
    InvalidInput(&'static str),
    /// Password hashing failed
    HashError(String),
    /// Database error
    DatabaseError(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::InvalidCredentials => write!(f, "Invalid credentials"),
            CredentialError::EmailTaken => write!(f, "Username already exists"),
            CredentialError::InvalidInput(reason) => write!(f, "Invalid input: {}", reason),
            CredentialError::HashError(e) => write!(f, "Password hashing error: {}", e),
            CredentialError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for CredentialError {}

impl CredentialService {
    /// Create a new CredentialService
    pub fn new(repo: Arc<AuthRepo>, config: Arc<Config>) -> Self {
        Self { repo, config }
    }

    /// Register a new user
    ///
    /// Returns the new user's ID
    pub fn signup(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<String, CredentialError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(CredentialError::InvalidInput("password is required"));
        }

        if self
            .repo
            .get_user_by_email(&email)
            .map_err(|e| CredentialError::DatabaseError(e.to_string()))?
            .is_some()
        {
            return Err(CredentialError::EmailTaken);
        }

        let password_hash = hash_password(password)?;
        self.repo
            .create_user(&email, full_name.trim(), &password_hash)
            .map_err(|e| match e {
                // Lost a race with a concurrent signup for the same email
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    CredentialError::EmailTaken
                }
                other => CredentialError::DatabaseError(other.to_string()),
            })
    }

    /// Check a password and mint a bearer token
    pub fn login(&self, email: &str, password: &str) -> Result<LoginResult, CredentialError> {
        let email = normalize_email(email)?;

        let (user_id, password_hash) = self
            .repo
            .get_password_hash(&email)
            .map_err(|e| CredentialError::DatabaseError(e.to_string()))?
            .ok_or(CredentialError::InvalidCredentials)?;

        if !verify_password(&password_hash, password) {
            return Err(CredentialError::InvalidCredentials);
        }

        let expires_at = Utc::now() + Duration::hours(self.config.session_expiry_hours);
        let session_token = self
            .repo
            .create_session(&user_id, expires_at)
            .map_err(|e| CredentialError::DatabaseError(e.to_string()))?;

        let _ = self.repo.update_last_login(&user_id);

        Ok(LoginResult {
            session_token,
            user_id,
            email,
        })
    }
}

fn normalize_email(email: &str) -> Result<String, CredentialError> {
    let email = normalize_identity(email);
    if !email.contains('@') || email.len() < 3 {
        return Err(CredentialError::InvalidInput("invalid email address"));
    }
    Ok(email)
}

/// Hash a password with argon2id and a random salt
fn hash_password(password: &str) -> Result<String, CredentialError> {
    use rand::Rng;
    let salt: [u8; 16] = rand::thread_rng().r#gen();
    let config = argon2::Config {
        variant: argon2::Variant::Argon2id,
        version: argon2::Version::Version13,
        ..Default::default()
    };
    argon2::hash_encoded(password.as_bytes(), &salt, &config)
        .map_err(|e| CredentialError::HashError(e.to_string()))
}

/// Verify a password against an encoded argon2 hash
fn verify_password(encoded: &str, password: &str) -> bool {
    argon2::verify_encoded(encoded, password.as_bytes()).unwrap_or(false)
}
