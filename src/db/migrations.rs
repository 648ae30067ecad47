// db/migrations.rs - Sequential schema migrations (C1 §4.1)
//
// `schema_version` tracks the highest applied migration id. Applying a
// newer binary runs all pending migrations in ascending order, each inside
// its own transaction; re-running is a no-op because every migration is
// skipped once `schema_version`'s max is >= its id. A `schema_version` row
// higher than this binary's max known migration means the database was
// written by a newer binary, and `run` refuses to proceed (no downgrades).

use sqlx::SqlitePool;

use crate::{Error, Result};

struct Migration {
    id: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "base_lists_and_tasks",
        sql: r#"
            CREATE TABLE task_lists (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '#808080',
                modified TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE tasks (
                id TEXT PRIMARY KEY,
                list_id TEXT NOT NULL REFERENCES task_lists(id) ON DELETE CASCADE,
                summary TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'TODO',
                priority INTEGER NOT NULL DEFAULT 0,
                due TEXT,
                start TEXT,
                completed TEXT,
                created TEXT NOT NULL,
                modified TEXT NOT NULL,
                parent TEXT REFERENCES tasks(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_tasks_list_id ON tasks(list_id);
            CREATE INDEX idx_tasks_parent ON tasks(parent);
        "#,
    },
    Migration {
        id: 2,
        name: "list_description",
        sql: "ALTER TABLE task_lists ADD COLUMN description TEXT;",
    },
    Migration {
        id: 3,
        name: "recurrence_fields",
        sql: r#"
            ALTER TABLE tasks ADD COLUMN description TEXT;
            ALTER TABLE tasks ADD COLUMN tags TEXT NOT NULL DEFAULT '[]';
            ALTER TABLE tasks ADD COLUMN recurrence TEXT;
            ALTER TABLE tasks ADD COLUMN recur_from_due INTEGER NOT NULL DEFAULT 0;
        "#,
    },
    Migration {
        id: 4,
        name: "backend_id_backfill_and_index",
        sql: r#"
            ALTER TABLE task_lists ADD COLUMN backend_id TEXT NOT NULL DEFAULT 'sqlite';
            ALTER TABLE tasks ADD COLUMN backend_id TEXT NOT NULL DEFAULT 'sqlite';
            CREATE INDEX idx_task_lists_backend_id ON task_lists(backend_id);
            CREATE INDEX idx_tasks_backend_id ON tasks(backend_id);
            CREATE UNIQUE INDEX idx_task_lists_name_backend
                ON task_lists(backend_id, LOWER(name))
                WHERE deleted_at IS NULL;
        "#,
    },
    Migration {
        id: 5,
        name: "operation_queue",
        sql: r#"
            CREATE TABLE operation_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                backend_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                claim_owner INTEGER,
                claim_expires_at TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX idx_operation_queue_backend_id ON operation_queue(backend_id);
            CREATE INDEX idx_operation_queue_claim ON operation_queue(claim_owner, claim_expires_at);
        "#,
    },
    Migration {
        id: 6,
        name: "sync_state_and_conflicts",
        sql: r#"
            CREATE TABLE sync_state (
                backend_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                etag TEXT,
                last_modified TEXT,
                snapshot TEXT,
                PRIMARY KEY (backend_id, entity_id)
            );

            CREATE TABLE backend_sync_meta (
                backend_id TEXT PRIMARY KEY,
                last_sync TEXT,
                last_error TEXT
            );

            CREATE TABLE conflicts (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                local_version TEXT NOT NULL,
                remote_version TEXT NOT NULL,
                local_modified TEXT NOT NULL,
                remote_modified TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                strategy TEXT
            );
            CREATE INDEX idx_conflicts_backend_id ON conflicts(backend_id);
            CREATE INDEX idx_conflicts_status ON conflicts(status);
        "#,
    },
    Migration {
        id: 7,
        name: "heartbeat_and_store_meta",
        sql: r#"
            CREATE TABLE heartbeat (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                pid INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                last_beat TEXT NOT NULL,
                sync_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE store_meta (
                backend_id TEXT PRIMARY KEY,
                last_vacuum TEXT
            );
        "#,
    },
    Migration {
        id: 8,
        name: "credentials_and_oauth_tokens",
        sql: r#"
            CREATE TABLE credentials (
                backend_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value_encrypted TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (backend_id, key)
            );

            CREATE TABLE oauth_tokens (
                provider TEXT PRIMARY KEY,
                access_token_encrypted TEXT NOT NULL,
                refresh_token_encrypted TEXT,
                expires_at INTEGER NOT NULL,
                scopes TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations in ascending order, each inside its own
/// transaction. Refuses to proceed if the database was written by a newer
/// binary (`schema_version` higher than this binary's max known id).
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    let max_applied: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await?;

    let max_known = MIGRATIONS.iter().map(|m| m.id).max().unwrap_or(0);
    if max_applied > max_known {
        return Err(Error::Config(format!(
            "database schema version {max_applied} is newer than this binary supports (max {max_known})"
        )));
    }

    for migration in MIGRATIONS {
        if migration.id <= max_applied {
            continue;
        }
        let mut tx = pool.begin().await?;
        for statement in migration.sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(migration.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(id = migration.id, name = migration.name, "applied migration");
    }

    Ok(())
}

/// The schema version currently applied to `pool` (`todoat migrate` surfaces
/// this so an operator can confirm a fresh binary picked up pending
/// migrations on its first run, since `run` itself applies them silently).
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    run(pool).await?;
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrations.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        (pool, dir)
    }

    #[tokio::test]
    async fn applies_all_migrations_once() {
        let (pool, _dir) = pool().await;
        run(&pool).await.unwrap();
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().id);
    }

    #[tokio::test]
    async fn rerunning_is_idempotent() {
        let (pool, _dir) = pool().await;
        run(&pool).await.unwrap();
        let before: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        run(&pool).await.unwrap();
        let after: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn refuses_to_downgrade() {
        let (pool, _dir) = pool().await;
        run(&pool).await.unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (999)")
            .execute(&pool)
            .await
            .unwrap();
        assert!(run(&pool).await.is_err());
    }
}
