//! Key/value access to the `items` table.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Read the raw value stored under `key`.
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        get_item(self.conn(), key)
    }

    /// Insert or replace the value stored under `key`.
    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        set_item(self.conn(), key, value)
    }

    /// Remove `key`. Returns `true` if a row was deleted.
    pub fn remove_item(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM items WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

// Free functions so the same queries can run inside a transaction.

pub(crate) fn get_item(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM items WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn set_item(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO items (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_item("k").unwrap(), None);

        db.set_item("k", "1").unwrap();
        db.set_item("k", "2").unwrap();
        assert_eq!(db.get_item("k").unwrap().as_deref(), Some("2"));

        assert!(db.remove_item("k").unwrap());
        assert!(!db.remove_item("k").unwrap());
    }
}
