//! Typed HTTP client for the `/api` surface and the session state built on it.

pub mod api_client;
pub mod auth_session;

pub use api_client::{ApiClient, ClientError, Params};
pub use auth_session::{AuthSession, AuthState};
