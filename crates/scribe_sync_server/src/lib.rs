//! Scribe Sync Server
//!
//! A collaborative document server: clients edit shared documents over
//! WebSockets and see each other's changes live.
//!
//! ## Features
//!
//! - **Real-time relay**: edits are applied to an in-memory snapshot and their
//!   change descriptors are forwarded to every other editor of the document
//! - **Write-behind persistence**: hot snapshots are flushed to SQLite on a
//!   fixed interval and once more when the last editor leaves
//! - **Password authentication**: argon2 password hashes and opaque bearer
//!   tokens
//! - **Access lists**: per-document readers and writers
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 127.0.0.1)
//! - `PORT`: Server port (default: 8080)
//! - `DATABASE_PATH`: Path to SQLite database (default: ./scribe.db)
//! - `SESSION_EXPIRY_HOURS`: Bearer token lifetime (default: 72)
//! - `FLUSH_INTERVAL_SECS`: Write-behind flush period (default: 30)
//! - `OUTBOX_CAPACITY`: Frames buffered per connection (default: 64)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod sync;

pub use config::Config;
