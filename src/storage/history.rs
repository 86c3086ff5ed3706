// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Message history storage using SQLite.

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Number of messages shown in the conversation view.
pub const RECENT_LIMIT: u32 = 10;

/// A chat message, sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub sender_name: String,
    pub sender_address: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub is_emergency: bool,
    /// `true` if the message came from the peer, `false` if we sent it.
    pub is_received: bool,
}

impl Message {
    /// A message that arrived from the peer, stamped with the current time.
    pub fn received(
        content: impl Into<String>,
        sender_name: impl Into<String>,
        sender_address: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            sender_name: sender_name.into(),
            sender_address: sender_address.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            is_emergency: false,
            is_received: true,
        }
    }

    /// A message written by the local user, stamped with the current time.
    pub fn sent(
        content: impl Into<String>,
        sender_name: impl Into<String>,
        sender_address: impl Into<String>,
        is_emergency: bool,
    ) -> Self {
        Self {
            content: content.into(),
            sender_name: sender_name.into(),
            sender_address: sender_address.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            is_emergency,
            is_received: false,
        }
    }

    /// Timestamp in local time.
    pub fn local_time(&self) -> DateTime<Local> {
        Local
            .timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Local::now)
    }
}

/// A message as stored, with its row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    #[serde(flatten)]
    pub message: Message,
}

/// Sink the connection manager writes messages to.
///
/// Called from blocking worker threads, never from an I/O task.
pub trait MessageStore: Send + Sync + 'static {
    /// Append a message durably and return its id.
    fn insert(&self, message: &Message) -> Result<i64>;
}

/// Message database manager.
#[derive(Clone)]
pub struct MessageHistory {
    conn: Arc<Mutex<Connection>>,
    max_entries: u32,
    revision: Arc<watch::Sender<u64>>,
}

impl MessageHistory {
    /// Create or open the message database.
    pub fn new(data_dir: &Path, max_entries: u32) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("messages.db");
        info!("Opening message database: {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                sender_address TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                is_emergency INTEGER NOT NULL DEFAULT 0,
                is_received INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp_ms DESC)",
            [],
        )?;

        let (revision, _) = watch::channel(0);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_entries,
            revision: Arc::new(revision),
        })
    }

    /// Subscribe to changes. The value is bumped after every write; re-query on change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Append a message and return its id.
    pub fn add(&self, message: &Message) -> Result<i64> {
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO messages (content, sender_name, sender_address, timestamp_ms, is_emergency, is_received)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.content,
                    message.sender_name,
                    message.sender_address,
                    message.timestamp_ms,
                    message.is_emergency,
                    message.is_received
                ],
            )?;
            let id = conn.last_insert_rowid();
            self.cleanup_old_entries(&conn)?;
            id
        };
        self.bump();
        Ok(id)
    }

    /// Overwrite a stored message.
    pub fn update(&self, stored: &StoredMessage) -> Result<()> {
        {
            let conn = self.conn.lock();
            let message = &stored.message;
            conn.execute(
                "UPDATE messages SET content = ?1, sender_name = ?2, sender_address = ?3,
                 timestamp_ms = ?4, is_emergency = ?5, is_received = ?6 WHERE id = ?7",
                params![
                    message.content,
                    message.sender_name,
                    message.sender_address,
                    message.timestamp_ms,
                    message.is_emergency,
                    message.is_received,
                    stored.id
                ],
            )?;
        }
        self.bump();
        Ok(())
    }

    /// Delete a single message.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM messages WHERE id = ?1", [id])?;
        self.bump();
        Ok(())
    }

    /// Clear all messages.
    pub fn clear(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM messages", [])?;
        info!("Message history cleared");
        self.bump();
        Ok(())
    }

    /// All messages, newest first.
    pub fn all(&self) -> Result<Vec<StoredMessage>> {
        self.query(
            "SELECT id, content, sender_name, sender_address, timestamp_ms, is_emergency, is_received
             FROM messages
             ORDER BY timestamp_ms DESC, id DESC",
            [],
        )
    }

    /// The `limit` most recent messages, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<StoredMessage>> {
        self.query(
            "SELECT id, content, sender_name, sender_address, timestamp_ms, is_emergency, is_received
             FROM messages
             ORDER BY timestamp_ms DESC, id DESC
             LIMIT ?1",
            [limit],
        )
    }

    /// Emergency messages only, newest first.
    pub fn emergency(&self) -> Result<Vec<StoredMessage>> {
        self.query(
            "SELECT id, content, sender_name, sender_address, timestamp_ms, is_emergency, is_received
             FROM messages
             WHERE is_emergency = 1
             ORDER BY timestamp_ms DESC, id DESC",
            [],
        )
    }

    /// Get total message count.
    pub fn count(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let messages = stmt
            .query_map(params, Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
        Ok(StoredMessage {
            id: row.get(0)?,
            message: Message {
                content: row.get(1)?,
                sender_name: row.get(2)?,
                sender_address: row.get(3)?,
                timestamp_ms: row.get(4)?,
                is_emergency: row.get(5)?,
                is_received: row.get(6)?,
            },
        })
    }

    /// Remove old entries beyond max_entries.
    fn cleanup_old_entries(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "DELETE FROM messages WHERE id NOT IN (
                SELECT id FROM messages ORDER BY timestamp_ms DESC, id DESC LIMIT ?1
            )",
            [self.max_entries],
        )?;
        Ok(())
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl MessageStore for MessageHistory {
    fn insert(&self, message: &Message) -> Result<i64> {
        self.add(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(mut message: Message, timestamp_ms: i64) -> Message {
        message.timestamp_ms = timestamp_ms;
        message
    }

    #[test]
    fn test_history_basic() {
        let dir = tempdir().unwrap();
        let history = MessageHistory::new(dir.path(), 100).unwrap();

        history
            .add(&at(Message::sent("Hello", "Me", "Local Device", false), 1_000))
            .unwrap();
        history
            .add(&at(Message::received("Hi back", "Remote", "AA:BB"), 2_000))
            .unwrap();

        let messages = history.all().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message.content, "Hi back");
        assert!(messages[0].message.is_received);
        assert_eq!(messages[0].message.sender_address, "AA:BB");
        assert_eq!(messages[1].message.content, "Hello");
        assert!(!messages[1].message.is_received);
    }

    #[test]
    fn test_recent_and_emergency() {
        let dir = tempdir().unwrap();
        let history = MessageHistory::new(dir.path(), 100).unwrap();

        for i in 0..15 {
            let emergency = i % 5 == 0;
            history
                .add(&at(
                    Message::sent(format!("msg {}", i), "Me", "Local Device", emergency),
                    i,
                ))
                .unwrap();
        }

        let recent = history.recent(RECENT_LIMIT).unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].message.content, "msg 14");
        assert_eq!(recent[9].message.content, "msg 5");

        let emergency = history.emergency().unwrap();
        let contents: Vec<_> = emergency.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 10", "msg 5", "msg 0"]);
    }

    #[test]
    fn test_update_delete_clear() {
        let dir = tempdir().unwrap();
        let history = MessageHistory::new(dir.path(), 100).unwrap();

        let id = history
            .add(&Message::sent("draft", "Me", "Local Device", false))
            .unwrap();
        let mut stored = history.all().unwrap().remove(0);
        assert_eq!(stored.id, id);

        stored.message.is_emergency = true;
        history.update(&stored).unwrap();
        assert_eq!(history.emergency().unwrap().len(), 1);

        history.delete(id).unwrap();
        assert_eq!(history.count().unwrap(), 0);

        history
            .add(&Message::received("a", "Remote", "AA"))
            .unwrap();
        history.clear().unwrap();
        assert_eq!(history.count().unwrap(), 0);
    }

    #[test]
    fn test_max_entries_prunes_oldest() {
        let dir = tempdir().unwrap();
        let history = MessageHistory::new(dir.path(), 3).unwrap();

        for i in 0..5 {
            history
                .add(&at(Message::received(format!("m{}", i), "Remote", "AA"), i))
                .unwrap();
        }

        let contents: Vec<_> = history
            .all()
            .unwrap()
            .into_iter()
            .map(|m| m.message.content)
            .collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
    }

    #[test]
    fn test_subscribe_sees_writes() {
        let dir = tempdir().unwrap();
        let history = MessageHistory::new(dir.path(), 100).unwrap();
        let mut updates = history.subscribe();
        assert!(!updates.has_changed().unwrap());

        history
            .add(&Message::received("ping", "Remote", "AA"))
            .unwrap();
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), 1);

        history.clear().unwrap();
        assert_eq!(*updates.borrow_and_update(), 2);
    }
}
