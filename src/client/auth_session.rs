use std::sync::Arc;

use super::api_client::{into_data, ApiClient, ClientError};
use crate::models::{RegisterRequest, User};

#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub token: Option<String>,
    pub loading: bool,
    pub is_authenticated: bool,
}

impl Default for AuthState {
    // Loading until the stored session has been checked.
    fn default() -> Self {
        AuthState { user: None, token: None, loading: true, is_authenticated: false }
    }
}

impl AuthState {
    fn signed_out() -> Self {
        AuthState { loading: false, ..Default::default() }
    }

    fn signed_in(token: String, user: Option<User>) -> Self {
        AuthState { user, token: Some(token), loading: false, is_authenticated: true }
    }
}

/// Who is signed in. Mirrors the stored `token`/`user` pair of the client.
pub struct AuthSession {
    client: Arc<ApiClient>,
    state: AuthState,
}

impl AuthSession {
    pub fn new(client: Arc<ApiClient>) -> Self {
        AuthSession { client, state: AuthState::default() }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Trusts the stored session until the profile call confirms it. Any failure signs out.
    pub async fn restore(&mut self) -> Result<bool, ClientError> {
        let Some(token) = self.client.stored_token()? else {
            self.state = AuthState::signed_out();
            return Ok(false);
        };
        self.state = AuthState::signed_in(token.clone(), self.client.stored_user()?);
        self.state.loading = true;

        match self.client.profile().await.and_then(into_data) {
            Ok(user) => {
                self.client.store_user(&user)?;
                self.state = AuthState::signed_in(token, Some(user));
                Ok(true)
            }
            Err(e) => {
                log::info!("Stored session rejected: {}", e);
                self.client.clear_credentials()?;
                self.state = AuthState::signed_out();
                Ok(false)
            }
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<User, ClientError> {
        let auth = into_data(self.client.login(username, password).await?)?;
        self.client.store_credentials(&auth)?;
        self.state = AuthState::signed_in(auth.token, Some(auth.user.clone()));
        Ok(auth.user)
    }

    pub async fn register(&mut self, request: &RegisterRequest) -> Result<User, ClientError> {
        let auth = into_data(self.client.register(request).await?)?;
        self.client.store_credentials(&auth)?;
        self.state = AuthState::signed_in(auth.token, Some(auth.user.clone()));
        Ok(auth.user)
    }

    /// The server call is best effort. Local credentials are always dropped.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        if let Err(e) = self.client.logout().await {
            log::warn!("Server logout failed: {}", e);
        }
        self.client.clear_credentials()?;
        self.state = AuthState::signed_out();
        Ok(())
    }
}
