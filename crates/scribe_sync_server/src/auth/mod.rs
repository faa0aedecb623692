mod credentials;
mod middleware;

pub use credentials::{CredentialError, CredentialService, LoginResult};
pub use middleware::{
    AuthExtractor, AuthUser, OptionalAuth, RequireAuth, extract_token_from_query, validate_token,
};
