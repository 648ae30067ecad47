// oauth/microsoft.rs - Microsoft identity platform OAuth2 for Graph's
// /me/todo surface (scope Tasks.ReadWrite, not calendar).

use async_trait::async_trait;
use oauth2::basic::BasicClient;

use crate::oauth::provider::{
    authorize_url_with_scopes, build_client, exchange_code_for_token, refresh_via_client,
    OAuthProvider, TokenResponse,
};
use crate::Result;

const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const SCOPES: &[&str] = &["Tasks.ReadWrite", "offline_access"];

pub struct MicrosoftTodoProvider {
    client: BasicClient,
}

impl MicrosoftTodoProvider {
    pub fn new(client_id: &str, client_secret: &str, redirect_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(client_id, client_secret, AUTH_URL, TOKEN_URL, redirect_url)?,
        })
    }
}

#[async_trait]
impl OAuthProvider for MicrosoftTodoProvider {
    fn provider_name(&self) -> &str {
        "msft_todo"
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
