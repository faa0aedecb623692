use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// User information
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Session information
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Credential and token repository for database operations
#[derive(Clone)]
pub struct AuthRepo {
    conn: Arc<Mutex<Connection>>,
}

impl AuthRepo {
    /// Create a new AuthRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    // Poisoned locks still hold a usable connection.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== User operations =====

    /// Get a user by ID
    pub fn get_user(&self, user_id: &str) -> Result<Option<UserInfo>, rusqlite::Error> {
        self.conn()
            .query_row(
                "SELECT id, email, full_name, created_at, last_login_at FROM users WHERE id = ?",
                [user_id],
                row_to_user,
            )
            .optional()
    }

    /// Get a user by email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserInfo>, rusqlite::Error> {
        self.conn()
            .query_row(
                "SELECT id, email, full_name, created_at, last_login_at FROM users WHERE email = ?",
                [email],
                row_to_user,
            )
            .optional()
    }

    /// Create a user (returns user ID)
    ///
    /// Fails with a constraint violation if the email is already registered.
    pub fn create_user(
        &self,
        email: &str,
        full_name: &str,
        password_hash: &str,
    ) -> Result<String, rusqlite::Error> {
        let user_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        self.conn().execute(
            "INSERT INTO users (id, email, full_name, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
            params![user_id, email, full_name, password_hash, now],
        )?;

        Ok(user_id)
    }

    /// Look up the stored password hash for an email (returns user ID and hash)
    pub fn get_password_hash(
        &self,
        email: &str,
    ) -> Result<Option<(String, String)>, rusqlite::Error> {
        self.conn()
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?",
                [email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    /// Update user's last login time
    pub fn update_last_login(&self, user_id: &str) -> Result<(), rusqlite::Error> {
        let now = Utc::now().timestamp();
        self.conn().execute(
            "UPDATE users SET last_login_at = ? WHERE id = ?",
            params![now, user_id],
        )?;
        Ok(())
    }

    // ===== Session operations =====

    /// Create a new auth session
    pub fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, rusqlite::Error> {
        let token = generate_secure_token();
        let now = Utc::now().timestamp();

        self.conn().execute(
            "INSERT INTO auth_sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
            params![token, user_id, expires_at.timestamp(), now],
        )?;

        Ok(token)
    }

    /// Validate a session token (returns session info if valid)
    pub fn validate_session(&self, token: &str) -> Result<Option<SessionInfo>, rusqlite::Error> {
        let now = Utc::now().timestamp();

        self.conn()
            .query_row(
                "SELECT token, user_id, expires_at, created_at
                 FROM auth_sessions WHERE token = ? AND expires_at > ?",
                params![token, now],
                |row| {
                    Ok(SessionInfo {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: timestamp_to_datetime(row.get(2)?),
                        created_at: timestamp_to_datetime(row.get(3)?),
                    })
                },
            )
            .optional()
    }

    /// Delete a session
    pub fn delete_session(&self, token: &str) -> Result<(), rusqlite::Error> {
        self.conn()
            .execute("DELETE FROM auth_sessions WHERE token = ?", [token])?;
        Ok(())
    }

    /// Clean up expired sessions
    pub fn cleanup_expired_sessions(&self) -> Result<usize, rusqlite::Error> {
        let now = Utc::now().timestamp();
        let deleted = self
            .conn()
            .execute("DELETE FROM auth_sessions WHERE expires_at < ?", [now])?;
        Ok(deleted)
    }
}

// ===== Helper functions =====

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserInfo, rusqlite::Error> {
    Ok(UserInfo {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        created_at: timestamp_to_datetime(row.get(3)?),
        last_login_at: row.get::<_, Option<i64>>(4)?.map(timestamp_to_datetime),
    })
}

/// Generate a cryptographically secure random token
fn generate_secure_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Convert Unix timestamp to DateTime<Utc>
fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}
