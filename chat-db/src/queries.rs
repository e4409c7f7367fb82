use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use chat_common::constants::SESSION_EXPIRY_HOURS;
use chat_common::ChatError;

use crate::models::{Channel, Inserted, MessageKind, MessageRecord, User};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
) -> Result<Inserted<i64>, ChatError> {
    let result = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?1, ?2)")
        .bind(username)
        .bind(password_hash)
        .execute(pool)
        .await;

    match result {
        Ok(res) => Ok(Inserted::Created(res.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => Ok(Inserted::Conflict),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<User>, ChatError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1 COLLATE NOCASE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn create_channel(
    pool: &SqlitePool,
    name: &str,
    description: &str,
    creator_id: i64,
) -> Result<Inserted<i64>, ChatError> {
    let result = sqlx::query(
        "INSERT INTO channels (name, description, creator_id) VALUES (?1, ?2, ?3)",
    )
    .bind(name)
    .bind(description)
    .bind(creator_id)
    .execute(pool)
    .await;

    match result {
        Ok(res) => Ok(Inserted::Created(res.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => Ok(Inserted::Conflict),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_channel_by_name(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<Channel>, ChatError> {
    let channel = sqlx::query_as::<_, Channel>(
        "SELECT id, name, description, creator_id, created_at FROM channels WHERE name = ?1 COLLATE NOCASE",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(channel)
}

pub async fn list_channels(pool: &SqlitePool) -> Result<Vec<Channel>, ChatError> {
    let channels = sqlx::query_as::<_, Channel>(
        "SELECT id, name, description, creator_id, created_at FROM channels ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(channels)
}

pub async fn save_message(
    pool: &SqlitePool,
    channel_id: i64,
    user_id: i64,
    content: &str,
    kind: MessageKind,
) -> Result<i64, ChatError> {
    let result = sqlx::query(
        "INSERT INTO messages (channel_id, user_id, content, kind) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(channel_id)
    .bind(user_id)
    .bind(content)
    .bind(kind.as_str())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Returns up to `limit` messages for `channel_id`, oldest first.
pub async fn get_message_history(
    pool: &SqlitePool,
    channel_id: i64,
    limit: i64,
) -> Result<Vec<MessageRecord>, ChatError> {
    let rows = sqlx::query_as::<_, MessageRecord>(
        r#"
        SELECT m.id, m.channel_id, u.username AS sender, m.content, m.created_at
        FROM messages m
        JOIN users u ON u.id = m.user_id
        WHERE m.channel_id = ?1
        ORDER BY m.created_at DESC, m.id DESC
        LIMIT ?2
        "#,
    )
    .bind(channel_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut rows = rows;
    rows.reverse();
    Ok(rows)
}

pub async fn create_session(
    pool: &SqlitePool,
    token: &str,
    user_id: i64,
) -> Result<(), ChatError> {
    let expires_at = Utc::now() + Duration::hours(SESSION_EXPIRY_HOURS);
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns the owning user id iff the token exists and has not expired.
/// Does not extend the session's lifetime.
pub async fn validate_session(pool: &SqlitePool, token: &str) -> Result<Option<i64>, ChatError> {
    let user_id = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
    )
    .bind(token)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    Ok(user_id)
}

/// Deletes expired session rows. Returns the number removed.
pub async fn prune_expired_sessions(pool: &SqlitePool) -> Result<u64, ChatError> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
