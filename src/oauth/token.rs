// oauth/token.rs - Token manager for secure storage and automatic refresh
// of Google Tasks / Microsoft To Do OAuth2 tokens.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::crypto;
use crate::oauth::provider::{OAuthProvider, TokenResponse};
use crate::{Error, Result};

/// Stored OAuth token with metadata. `access_token`/`refresh_token` are held
/// decrypted in memory; only the `_encrypted` columns ever reach disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub scopes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredToken {
    /// Check if token is expired or will expire within buffer_seconds
    pub fn is_expired(&self, buffer_seconds: i64) -> bool {
        let now = Utc::now().timestamp();
        self.expires_at <= (now + buffer_seconds)
    }

    /// Check if token needs refresh (5 minutes buffer)
    pub fn needs_refresh(&self) -> bool {
        self.is_expired(300)
    }
}

/// Token manager for secure storage and automatic refresh. Tokens are
/// encrypted at rest via `db::crypto` and cached decrypted in memory.
pub struct TokenManager {
    pool: SqlitePool,
    cache: Arc<RwLock<HashMap<String, StoredToken>>>,
}

impl TokenManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store or replace the token for `provider_name`.
    pub async fn store_token(
        &self,
        provider_name: &str,
        token_response: &TokenResponse,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = now + token_response.expires_in;

        let access_encrypted = crypto::encrypt(&token_response.access_token)?;
        let refresh_encrypted = match &token_response.refresh_token {
            Some(t) => Some(crypto::encrypt(t)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO oauth_tokens (
                provider, access_token_encrypted, refresh_token_encrypted,
                expires_at, scopes, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider) DO UPDATE SET
                access_token_encrypted = excluded.access_token_encrypted,
                refresh_token_encrypted = excluded.refresh_token_encrypted,
                expires_at = excluded.expires_at,
                scopes = excluded.scopes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(provider_name)
        .bind(&access_encrypted)
        .bind(&refresh_encrypted)
        .bind(expires_at)
        .bind(&token_response.scope)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let stored_token = StoredToken {
            provider: provider_name.to_string(),
            access_token: token_response.access_token.clone(),
            refresh_token: token_response.refresh_token.clone(),
            expires_at,
            scopes: token_response.scope.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut cache = self.cache.write().await;
        cache.insert(provider_name.to_string(), stored_token);

        tracing::info!(provider = provider_name, "stored oauth token");

        Ok(())
    }

    /// Get a valid access token, refreshing it first if it's within its
    /// expiry buffer.
    pub async fn get_valid_token(
        &self,
        provider_name: &str,
        provider: &dyn OAuthProvider,
    ) -> Result<String> {
        let cached_token = {
            let cache = self.cache.read().await;
            cache.get(provider_name).cloned()
        };

        let mut token = match cached_token {
            Some(t) => t,
            None => self.load_token(provider_name).await?,
        };

        if token.needs_refresh() {
            tracing::info!(provider = provider_name, "refreshing oauth token");
            token = self.refresh_token_internal(provider_name, provider, &token).await?;
        }

        Ok(token.access_token)
    }

    /// Get the stored token without attempting a refresh.
    pub async fn get_token(&self, provider_name: &str) -> Result<StoredToken> {
        let cached_token = {
            let cache = self.cache.read().await;
            cache.get(provider_name).cloned()
        };

        match cached_token {
            Some(t) => Ok(t),
            None => self.load_token(provider_name).await,
        }
    }

    async fn load_token(&self, provider_name: &str) -> Result<StoredToken> {
        let row: Option<(String, String, Option<String>, i64, Option<String>, i64, i64)> =
            sqlx::query_as(
                r#"
                SELECT provider, access_token_encrypted, refresh_token_encrypted,
                       expires_at, scopes, created_at, updated_at
                FROM oauth_tokens
                WHERE provider = ?
                "#,
            )
            .bind(provider_name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((provider, access_enc, refresh_enc, expires_at, scopes, created_at, updated_at)) => {
                let token = StoredToken {
                    provider,
                    access_token: crypto::decrypt(&access_enc)?,
                    refresh_token: refresh_enc.as_deref().map(crypto::decrypt).transpose()?,
                    expires_at,
                    scopes,
                    created_at,
                    updated_at,
                };

                let mut cache = self.cache.write().await;
                cache.insert(provider_name.to_string(), token.clone());

                Ok(token)
            }
            None => Err(Error::Auth(format!("no token stored for provider: {provider_name}"))),
        }
    }

    async fn refresh_token_internal(
        &self,
        provider_name: &str,
        provider: &dyn OAuthProvider,
        token: &StoredToken,
    ) -> Result<StoredToken> {
        let refresh_token = token
            .refresh_token
            .as_ref()
            .ok_or_else(|| Error::Auth("no refresh token available".to_string()))?;

        let token_response = provider.refresh_token(refresh_token).await?;

        let now = Utc::now().timestamp();
        let expires_at = now + token_response.expires_in;
        let access_encrypted = crypto::encrypt(&token_response.access_token)?;
        let refresh_encrypted = match &token_response.refresh_token {
            Some(t) => Some(crypto::encrypt(t)?),
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE oauth_tokens
            SET access_token_encrypted = ?, refresh_token_encrypted = ?, expires_at = ?,
                scopes = ?, updated_at = ?
            WHERE provider = ?
            "#,
        )
        .bind(&access_encrypted)
        .bind(&refresh_encrypted)
        .bind(expires_at)
        .bind(&token_response.scope)
        .bind(now)
        .bind(provider_name)
        .execute(&self.pool)
        .await?;

        let refreshed_token = StoredToken {
            provider: provider_name.to_string(),
            access_token: token_response.access_token.clone(),
            refresh_token: token_response.refresh_token.clone(),
            expires_at,
            scopes: token_response.scope.clone(),
            created_at: token.created_at,
            updated_at: now,
        };

        let mut cache = self.cache.write().await;
        cache.insert(provider_name.to_string(), refreshed_token.clone());

        tracing::info!(provider = provider_name, "refreshed oauth token");

        Ok(refreshed_token)
    }

    pub async fn delete_token(&self, provider_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM oauth_tokens WHERE provider = ?")
            .bind(provider_name)
            .execute(&self.pool)
            .await?;

        let mut cache = self.cache.write().await;
        cache.remove(provider_name);

        Ok(())
    }

    pub async fn has_token(&self, provider_name: &str) -> bool {
        {
            let cache = self.cache.read().await;
            if cache.contains_key(provider_name) {
                return true;
            }
        }

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM oauth_tokens WHERE provider = ?")
            .bind(provider_name)
            .fetch_one(&self.pool)
            .await
            .unwrap_or((0,));

        count.0 > 0
    }

    pub async fn list_connected_providers(&self) -> Result<Vec<String>> {
        let providers: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT provider FROM oauth_tokens")
                .fetch_all(&self.pool)
                .await?;

        Ok(providers.into_iter().map(|(p,)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_token_expiry() {
        let now = Utc::now().timestamp();

        let token = StoredToken {
            provider: "test".to_string(),
            access_token: "test".to_string(),
            refresh_token: None,
            expires_at: now + 600,
            scopes: None,
            created_at: now,
            updated_at: now,
        };

        assert!(!token.is_expired(300));
        assert!(token.is_expired(900));
    }

    #[test]
    fn stored_token_needs_refresh() {
        let now = Utc::now().timestamp();

        let token = StoredToken {
            provider: "test".to_string(),
            access_token: "test".to_string(),
            refresh_token: None,
            expires_at: now + 600,
            scopes: None,
            created_at: now,
            updated_at: now,
        };

        assert!(!token.needs_refresh());

        let token_soon = StoredToken {
            expires_at: now + 120,
            ..token
        };

        assert!(token_soon.needs_refresh());
    }
}
