use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use shared_utils::Clock;

use crate::error::ChatError;
use crate::models::ChatMessage;

const KEY_PREFIX: &str = "telecare_chat";

/// Plain string key-value persistence for chat history, matching the local
/// device storage contract: one value key per user plus a parallel expiry
/// key holding an RFC 3339 instant.
pub trait HistoryStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ChatError>;
    fn remove(&self, key: &str) -> Result<(), ChatError>;
}

/// SQLite-backed store: a single key/value table, keys stored verbatim so
/// distinct user ids can never alias each other.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, ChatError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|e| ChatError::Storage(e.to_string()))?;
        let conn = Connection::open(data_dir.join("chat_history.db"))
            .map_err(|e| ChatError::Storage(e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| ChatError::Storage(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let conn = self.conn.lock();
        match conn.query_row(
            "SELECT value FROM chat_history WHERE key = ?1",
            params![key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ChatError::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chat_history (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| ChatError::Storage(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM chat_history WHERE key = ?1", params![key])
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Per-user expiring conversation history. Reads are expiry-checked on
/// load; expired or unreadable entries are purged eagerly before the load
/// reports "no history".
pub struct ChatHistory {
    store: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl ChatHistory {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        clock: Arc<dyn Clock>,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            clock,
            retention: chrono::Duration::days(retention_days),
        }
    }

    fn value_key(user_id: &str) -> String {
        format!("{}_{}", KEY_PREFIX, user_id)
    }

    fn expiry_key(user_id: &str) -> String {
        format!("{}_{}_expiry", KEY_PREFIX, user_id)
    }

    /// Persists the full ordered message list, skipping ephemeral typing
    /// placeholders, with expiry = now + retention.
    pub fn save(&self, user_id: &str, messages: &[ChatMessage]) -> Result<(), ChatError> {
        let persistable: Vec<&ChatMessage> =
            messages.iter().filter(|m| !m.is_typing).collect();
        let serialized = serde_json::to_string(&persistable)?;
        let expires_at = self.clock.now() + self.retention;

        self.store.set(&Self::value_key(user_id), &serialized)?;
        self.store
            .set(&Self::expiry_key(user_id), &expires_at.to_rfc3339())?;
        Ok(())
    }

    pub fn load(&self, user_id: &str) -> Result<Option<Vec<ChatMessage>>, ChatError> {
        let expiry_raw = match self.store.get(&Self::expiry_key(user_id))? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let expires_at = match DateTime::parse_from_rfc3339(&expiry_raw) {
            Ok(dt) => dt.with_timezone(&chrono::Utc),
            Err(e) => {
                warn!("Unreadable history expiry for user {}: {}", user_id, e);
                self.purge(user_id)?;
                return Ok(None);
            }
        };

        if expires_at <= self.clock.now() {
            debug!("Chat history expired for user {}, purging", user_id);
            self.purge(user_id)?;
            return Ok(None);
        }

        let raw = match self.store.get(&Self::value_key(user_id))? {
            Some(raw) => raw,
            None => {
                self.purge(user_id)?;
                return Ok(None);
            }
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&raw) {
            Ok(messages) => Ok(Some(messages)),
            Err(e) => {
                warn!("Unreadable history payload for user {}: {}", user_id, e);
                self.purge(user_id)?;
                Ok(None)
            }
        }
    }

    /// Removes both the payload and the expiry marker.
    pub fn purge(&self, user_id: &str) -> Result<(), ChatError> {
        self.store.remove(&Self::value_key(user_id))?;
        self.store.remove(&Self::expiry_key(user_id))?;
        Ok(())
    }
}
