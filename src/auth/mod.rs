//! Static bearer-token authentication
//!
//! Every route except `/health` and the OpenAPI document requires
//!
//! ```text
//! Authorization: Bearer <token>
//! ```
//!
//! where `<token>` is the value of the environment variable named by
//! `auth.api_token_env` in `veriface.toml` (default `API_TOKEN`).

/// Axum middleware enforcing the bearer token.
pub mod middleware;

pub use middleware::{ApiTokenAuth, auth_middleware};
