// db/credentials.rs - At-rest credential storage for backend adapters
//
// CalDAV basic-auth passwords, Todoist API tokens, and similar per-backend
// secrets are stored encrypted here, keyed by `(backend_id, key)`. OAuth
// access/refresh tokens for Google Tasks and Microsoft To Do live in the
// separate `oauth_tokens` table managed by [`crate::oauth::token::TokenManager`];
// both use the same `db::crypto` AES-256-GCM-at-rest helper (spec.md places
// credential *keyring* plumbing out of scope, not credential storage itself).

use crate::db::{crypto, Store};
use crate::Result;

pub async fn set(store: &Store, backend_id: &str, key: &str, value: &str) -> Result<()> {
    let encrypted = crypto::encrypt(value)?;
    let now = chrono::Utc::now();
    sqlx::query(
        r#"
        INSERT INTO credentials (backend_id, key, value_encrypted, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(backend_id, key) DO UPDATE SET
            value_encrypted = excluded.value_encrypted,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(backend_id)
    .bind(key)
    .bind(encrypted)
    .bind(now)
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn get(store: &Store, backend_id: &str, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT value_encrypted FROM credentials WHERE backend_id = ? AND key = ?",
    )
    .bind(backend_id)
    .bind(key)
    .fetch_optional(store.pool())
    .await?;
    row.map(|(enc,)| crypto::decrypt(&enc)).transpose()
}

pub async fn delete(store: &Store, backend_id: &str, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM credentials WHERE backend_id = ? AND key = ?")
        .bind(backend_id)
        .bind(key)
        .execute(store.pool())
        .await?;
    Ok(())
}

pub async fn list_backends(store: &Store) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT backend_id FROM credentials")
        .fetch_all(store.pool())
        .await?;
    Ok(rows.into_iter().map(|(b,)| b).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_through_encryption() {
        let (store, _dir) = Store::open_temp("nextcloud").await;
        set(&store, "nextcloud", "password", "hunter2").await.unwrap();
        assert_eq!(
            get(&store, "nextcloud", "password").await.unwrap(),
            Some("hunter2".to_string())
        );
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let (store, _dir) = Store::open_temp("nextcloud").await;
        assert_eq!(get(&store, "nextcloud", "password").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_credential() {
        let (store, _dir) = Store::open_temp("nextcloud").await;
        set(&store, "nextcloud", "password", "hunter2").await.unwrap();
        delete(&store, "nextcloud", "password").await.unwrap();
        assert_eq!(get(&store, "nextcloud", "password").await.unwrap(), None);
    }
}
