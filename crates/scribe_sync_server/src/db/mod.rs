mod repo;
mod schema;

pub use repo::{AuthRepo, SessionInfo, UserInfo};
pub use schema::init_database;
