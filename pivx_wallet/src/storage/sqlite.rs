//! A [`KeyValueStore`] backed by a SQLite database.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Error, KeyValueStore};

/// A [`KeyValueStore`] keeping its entries in a single `kv` table.
///
/// SQLite compares blobs with `memcmp`, so the primary key index yields entries in the
/// same order as an in-memory ordered map.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (and if necessary initializes) the wallet database at `path`.
    pub fn open<F: AsRef<Path>>(path: F) -> Result<Self, Error> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
        )?;
        Ok(SqliteStore { conn })
    }
}

impl KeyValueStore for SqliteStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(Error::from)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
        let rows = stmt.query_map([prefix], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut entries = vec![];
        for row in rows {
            let (key, value) = row?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }
}
