//! Authentication module.
//!
//! The proxy trusts a signed session token (HS256 JWT) whose subject is the
//! user's `user_uid`. It is read from a bearer header or the session cookie.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError};
pub use error::AuthError;
pub(crate) use middleware::cookie_value;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
