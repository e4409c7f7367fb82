//! Embedded schema, applied idempotently on every startup.

use sqlx::SqlitePool;

use chat_common::ChatError;

use crate::DEFAULT_CHANNEL_NAME;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL COLLATE NOCASE UNIQUE,
    password_hash TEXT NOT NULL,
    created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS channels (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL COLLATE NOCASE UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    creator_id  INTEGER REFERENCES users(id),
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL REFERENCES channels(id),
    user_id    INTEGER NOT NULL REFERENCES users(id),
    content    TEXT NOT NULL,
    kind       TEXT NOT NULL DEFAULT 'message',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_created
    ON messages (channel_id, created_at);

CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    expires_at TEXT NOT NULL
);
"#;

/// Creates tables/indexes if absent and seeds the default channel.
pub async fn init(pool: &SqlitePool) -> Result<(), ChatError> {
    sqlx::query("PRAGMA foreign_keys = ON;").execute(pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL;").execute(pool).await?;

    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM channels WHERE name = ?1 COLLATE NOCASE",
    )
    .bind(DEFAULT_CHANNEL_NAME)
    .fetch_one(pool)
    .await?;

    if existing == 0 {
        sqlx::query("INSERT INTO channels (name, description, creator_id) VALUES (?1, ?2, NULL)")
            .bind(DEFAULT_CHANNEL_NAME)
            .bind(chat_common::constants::DEFAULT_CHANNEL_DESCRIPTION)
            .execute(pool)
            .await?;
    }

    Ok(())
}
