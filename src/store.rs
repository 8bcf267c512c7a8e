/*!
 * Durable key-value storage for rooms
 *
 * A room only ever sees its own keys: everything goes through a
 * `RoomStorage`, which pins the room id for every read and write.
 */
use async_std::sync::Mutex;
use async_trait::async_trait;
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, room: &str, key: &str) -> Result<Option<String>, StoreError>;

    async fn save(&self, room: &str, key: &str, value: &str) -> Result<(), StoreError>;
}

/**
 * SQLite backed store, one row per (room, key)
 */
#[derive(Clone, Debug)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /**
     * Open (creating if needed) the database at `url` and make sure the
     * storage table exists
     */
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(crate::schema::CREATE_ROOM_STORAGE)
            .execute(&pool)
            .await?;
        info!("Connected to room storage at {}", url);

        Ok(Self { pool })
    }
}

#[async_trait]
impl DurableStore for SqlStore {
    async fn load(&self, room: &str, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>(crate::schema::SELECT_VALUE)
            .bind(room)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn save(&self, room: &str, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(crate::schema::UPSERT_VALUE)
            .bind(room)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/**
 * Process-local store, nothing here survives a restart
 */
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, room: &str, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&(room.to_string(), key.to_string())).cloned())
    }

    async fn save(&self, room: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert((room.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

/**
 * A store scoped down to a single room, values are kept as JSON
 */
#[derive(Clone)]
pub struct RoomStorage {
    room: String,
    store: Arc<dyn DurableStore>,
}

impl RoomStorage {
    pub fn new(room: &str, store: Arc<dyn DurableStore>) -> Self {
        Self {
            room: room.to_string(),
            store,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.load(&self.room, key).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_string(value)?;
        self.store.save(&self.room, key, &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InsertablePoll, Poll};

    async fn sqlite() -> SqlStore {
        // A single connection, every new connection to :memory: is a new database
        SqlStore::connect("sqlite::memory:", 1)
            .await
            .expect("Failed to open in-memory sqlite")
    }

    #[async_std::test]
    async fn memory_store_misses_unknown_keys() {
        let store = MemoryStore::default();
        assert_eq!(store.load("room", "poll").await.unwrap(), None);
    }

    #[async_std::test]
    async fn memory_store_keeps_rooms_apart() {
        let store = MemoryStore::default();
        store.save("a", "poll", "1").await.unwrap();
        store.save("b", "poll", "2").await.unwrap();
        assert_eq!(store.load("a", "poll").await.unwrap(), Some("1".into()));
        assert_eq!(store.load("b", "poll").await.unwrap(), Some("2".into()));
    }

    #[async_std::test]
    async fn sql_store_upserts() {
        let store = sqlite().await;
        assert_eq!(store.load("room", "poll").await.unwrap(), None);

        store.save("room", "poll", "first").await.unwrap();
        store.save("room", "poll", "second").await.unwrap();
        assert_eq!(store.load("room", "poll").await.unwrap(), Some("second".into()));
    }

    #[async_std::test]
    async fn sql_store_keeps_rooms_apart() {
        let store = sqlite().await;
        store.save("a", "poll", "1").await.unwrap();
        assert_eq!(store.load("b", "poll").await.unwrap(), None);
    }

    #[async_std::test]
    async fn room_storage_round_trips_a_poll() {
        let store: Arc<dyn DurableStore> = Arc::new(sqlite().await);
        let storage = RoomStorage::new("lunch", store.clone());

        let mut poll = InsertablePoll::new("Lunch?", &["Pizza", "Sushi"], 60)
            .into_poll()
            .unwrap();
        poll.vote(1).unwrap();
        storage.put("poll", &poll).await.unwrap();

        let loaded: Option<Poll> = storage.get("poll").await.unwrap();
        assert_eq!(loaded, Some(poll));

        let other = RoomStorage::new("dinner", store);
        let missing: Option<Poll> = other.get("poll").await.unwrap();
        assert!(missing.is_none());
    }

    #[async_std::test]
    async fn room_storage_reports_corrupt_values() {
        let store = Arc::new(MemoryStore::default());
        store.save("room", "poll", "{not json").await.unwrap();
        let storage = RoomStorage::new("room", store);
        let loaded: Result<Option<Poll>, _> = storage.get("poll").await;
        assert!(matches!(loaded, Err(StoreError::Serialization(_))));
    }
}
