//! The conversation history, persisted as one JSON document under
//! [`HISTORY_KEY`].

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use portier_shared::constants::HISTORY_KEY;
use portier_shared::types::{Conversation, History};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::exchange;
use crate::items;

/// CRUD and import over the stored [`History`].
///
/// Each mutation is a read-modify-write inside one SQLite transaction, and
/// is committed before the method returns.
pub struct ConversationStore<'db> {
    db: &'db Database,
}

impl<'db> ConversationStore<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Snapshot of every stored conversation.
    pub fn get_all(&self) -> Result<History> {
        read_history(self.db.conn())
    }

    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.get_all()?.0.remove(id))
    }

    /// Upsert `conversation` under `id`, minting a fresh id when `id` is
    /// empty. Returns the id used.
    pub fn store(&self, id: &str, mut conversation: Conversation) -> Result<String> {
        let id = if id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id.to_owned()
        };
        conversation.id = id.clone();

        self.mutate(|history| {
            history.0.insert(id.clone(), conversation);
        })?;

        debug!(id = %id, "conversation stored");
        Ok(id)
    }

    /// Remove a conversation. Returns `false` if it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.mutate(|history| history.0.remove(id).is_some())?;
        if removed {
            debug!(id = %id, "conversation deleted");
        }
        Ok(removed)
    }

    /// Rename a conversation. Returns `false` if it did not exist.
    pub fn update_name(&self, id: &str, name: &str) -> Result<bool> {
        self.mutate(|history| match history.0.get_mut(id) {
            Some(conversation) => {
                conversation.name = name.to_owned();
                true
            }
            None => false,
        })
    }

    /// Remove every conversation. The token total is not affected.
    pub fn clear(&self) -> Result<()> {
        self.mutate(|history| history.0.clear())?;
        info!("conversation history cleared");
        Ok(())
    }

    /// Validate, sanitize and store an exported conversation under a fresh
    /// id. Nothing is written if the document is rejected.
    pub fn import(&self, raw: &str) -> Result<String> {
        let conversation = exchange::parse_import(raw, Utc::now())?;
        let messages = conversation.messages.len();
        let id = self.store("", conversation)?;
        info!(id = %id, messages, "conversation imported");
        Ok(id)
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut History) -> T) -> Result<T> {
        let tx = self.db.conn().unchecked_transaction()?;
        let mut history = read_history(&tx)?;
        let out = apply(&mut history);
        items::set_item(&tx, HISTORY_KEY, &serde_json::to_string(&history)?)?;
        tx.commit()?;
        Ok(out)
    }
}

fn read_history(conn: &Connection) -> Result<History> {
    let Some(raw) = items::get_item(conn, HISTORY_KEY)? else {
        return Ok(History::default());
    };

    let mut history: History = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        key: HISTORY_KEY.to_owned(),
        reason: e.to_string(),
    })?;

    // Records written before ids were embedded only carry them as map keys.
    for (id, conversation) in history.0.iter_mut() {
        if conversation.id != *id {
            conversation.id = id.clone();
        }
    }
    Ok(history)
}
