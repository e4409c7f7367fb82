//! Embedded SQLite persistence for users, channels, messages, and sessions.

pub mod models;
pub mod queries;
pub mod schema;

pub use models::{Channel, Inserted, MessageKind, MessageRecord, User};

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use chat_common::ChatError;

pub const DEFAULT_CHANNEL_NAME: &str = chat_common::constants::DEFAULT_CHANNEL;

/// Handle to the embedded database. Cloning is cheap; it shares the
/// underlying connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite file at `path`, applies the
    /// schema, and seeds the default channel.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))
            .map_err(ChatError::Database)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        schema::init(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<Inserted<i64>, ChatError> {
        queries::create_user(&self.pool, username, password_hash).await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ChatError> {
        queries::get_user_by_username(&self.pool, username).await
    }

    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
        creator_id: i64,
    ) -> Result<Inserted<i64>, ChatError> {
        queries::create_channel(&self.pool, name, description, creator_id).await
    }

    pub async fn get_channel_by_name(&self, name: &str) -> Result<Option<Channel>, ChatError> {
        queries::get_channel_by_name(&self.pool, name).await
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, ChatError> {
        queries::list_channels(&self.pool).await
    }

    pub async fn save_message(
        &self,
        channel_id: i64,
        user_id: i64,
        content: &str,
        kind: MessageKind,
    ) -> Result<i64, ChatError> {
        queries::save_message(&self.pool, channel_id, user_id, content, kind).await
    }

    pub async fn get_message_history(
        &self,
        channel_id: i64,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, ChatError> {
        queries::get_message_history(&self.pool, channel_id, limit).await
    }

    pub async fn create_session(&self, token: &str, user_id: i64) -> Result<(), ChatError> {
        queries::create_session(&self.pool, token, user_id).await
    }

    pub async fn validate_session(&self, token: &str) -> Result<Option<i64>, ChatError> {
        queries::validate_session(&self.pool, token).await
    }

    /// Deletes expired session rows; used by the periodic pruning sweep.
    pub async fn prune_expired_sessions(&self) -> Result<u64, ChatError> {
        queries::prune_expired_sessions(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_file_and_seeds_default_channel() {
        let dir = std::env::temp_dir().join(format!("chat-db-test-{}", std::process::id()));
        let store = Store::open(&dir).await.unwrap();
        let general = store.get_channel_by_name("general").await.unwrap();
        assert!(general.is_some());
        let _ = std::fs::remove_file(&dir);
    }
}
