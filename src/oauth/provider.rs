// oauth/provider.rs - Provider-agnostic OAuth2 authorization-code+PKCE contract
// shared by the Google Tasks and Microsoft To Do backends.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse as OAuth2TokenResponseExt,
    TokenUrl,
};

use crate::{Error, Result};

/// A token response normalized across providers; `expires_in` is seconds
/// from now, matching the wire shape both Google and Microsoft return.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Builds the URL the user visits to grant access, returning it
    /// alongside the CSRF state token the caller must stash and verify.
    fn authorize_url(&self, code_challenge: String) -> (String, String);

    async fn exchange_code(&self, code: String, code_verifier: String) -> Result<TokenResponse>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
}

pub(crate) fn build_client(
    client_id: &str,
    client_secret: &str,
    auth_url: &str,
    token_url: &str,
    redirect_url: &str,
) -> Result<BasicClient> {
    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.to_string())),
        AuthUrl::new(auth_url.to_string()).map_err(|e| Error::Config(e.to_string()))?,
        Some(TokenUrl::new(token_url.to_string()).map_err(|e| Error::Config(e.to_string()))?),
    )
    .set_redirect_uri(RedirectUrl::new(redirect_url.to_string()).map_err(|e| Error::Config(e.to_string()))?))
}

pub(crate) fn authorize_url_with_scopes(
    client: &BasicClient,
    code_challenge: String,
    scopes: &[&str],
) -> (String, String) {
    let challenge = PkceCodeChallenge::from_challenge_encoded(code_challenge);
    let mut req = client
        .authorize_url(CsrfToken::new_random)
        .set_pkce_challenge(challenge);
    for scope in scopes {
        req = req.add_scope(Scope::new((*scope).to_string()));
    }
    let (url, state) = req.url();
    (url.to_string(), state.secret().clone())
}

pub(crate) async fn exchange_code_for_token(
    client: &BasicClient,
    code: String,
    code_verifier: String,
) -> Result<TokenResponse> {
    let verifier = PkceCodeVerifier::new(code_verifier);
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| Error::Auth(format!("token exchange failed: {e}")))?;

    Ok(TokenResponse {
        access_token: token.access_token().secret().clone(),
        refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        expires_in: token.expires_in().map(|d| d.as_secs() as i64).unwrap_or(3600),
        scope: token
            .scopes()
            .map(|s| s.iter().map(|sc| sc.to_string()).collect::<Vec<_>>().join(" ")),
    })
}

pub(crate) async fn refresh_via_client(client: &BasicClient, refresh_token: &str) -> Result<TokenResponse> {
    let token = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| Error::Auth(format!("token refresh failed: {e}")))?;

    Ok(TokenResponse {
        access_token: token.access_token().secret().clone(),
        refresh_token: token
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| Some(refresh_token.to_string())),
        expires_in: token.expires_in().map(|d| d.as_secs() as i64).unwrap_or(3600),
        scope: token
            .scopes()
            .map(|s| s.iter().map(|sc| sc.to_string()).collect::<Vec<_>>().join(" ")),
    })
}
