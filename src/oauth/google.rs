// oauth/google.rs - Google OAuth2 for the Tasks API (scope restricted to
// https://www.googleapis.com/auth/tasks, not calendar).

use async_trait::async_trait;
use oauth2::basic::BasicClient;

use crate::oauth::provider::{
    authorize_url_with_scopes, build_client, exchange_code_for_token, refresh_via_client,
    OAuthProvider, TokenResponse,
};
use crate::Result;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/tasks"];

pub struct GoogleTasksProvider {
    client: BasicClient,
}

impl GoogleTasksProvider {
    pub fn new(client_id: &str, client_secret: &str, redirect_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(client_id, client_secret, AUTH_URL, TOKEN_URL, redirect_url)?,
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleTasksProvider {
    fn provider_name(&self) -> &str {
        "google_tasks"
    }

    fn authorize_url(&self, code_challenge: String) -> (String, String) {
        authorize_url_with_scopes(&self.client, code_challenge, SCOPES)
    }

    async fn exchange_code(&self, code: String, code_verifier: String) -> Result<TokenResponse> {
        exchange_code_for_token(&self.client, code, code_verifier).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        refresh_via_client(&self.client, refresh_token).await
    }
}
