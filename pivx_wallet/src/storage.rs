//! Durable wallet state.
//!
//! The wallet persists everything through an ordered byte-keyed [`KeyValueStore`].
//! [`WalletDb`] layers typed records on top of it; [`MemoryStore`] and [`SqliteStore`]
//! are the two stores provided here.

use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::io;

mod db;
mod sqlite;

pub use db::{CryptedSaplingKey, WalletDb};
pub use sqlite::SqliteStore;

/// Errors that can occur while reading or writing the store.
#[derive(Debug)]
pub enum Error {
    /// Wrapper for rusqlite errors.
    Sqlite(rusqlite::Error),

    /// Wrapper for errors from the IO subsystem, raised while (de)serializing records.
    Io(io::Error),

    /// Decoding of a stored value from its serialized form has failed.
    CorruptedData(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            Error::Sqlite(e) => write!(f, "Wallet database error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::CorruptedData(reason) => write!(f, "Wallet database is corrupted: {}", reason),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self {
            Error::Sqlite(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::CorruptedData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Sqlite(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// An ordered key-value store.
pub trait KeyValueStore {
    /// Inserts or replaces the value stored under `key`.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<(), Error>;

    /// Returns every entry whose key starts with `prefix`, in key order.
    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;
}

/// A [`KeyValueStore`] held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.get(key).cloned())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyValueStore, MemoryStore, SqliteStore};

    fn exercise<S: KeyValueStore>(store: &mut S) {
        store.put(b"\x02ab1", b"one").unwrap();
        store.put(b"\x02ab2", b"two").unwrap();
        store.put(b"\x02ac", b"other").unwrap();
        store.put(b"\x01a", b"short").unwrap();

        assert_eq!(store.get(b"\x02ab1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);

        let found = store.iterate(b"\x02ab").unwrap();
        assert_eq!(
            found,
            vec![
                (b"\x02ab1".to_vec(), b"one".to_vec()),
                (b"\x02ab2".to_vec(), b"two".to_vec()),
            ]
        );

        store.put(b"\x02ab1", b"replaced").unwrap();
        assert_eq!(store.get(b"\x02ab1").unwrap(), Some(b"replaced".to_vec()));

        store.delete(b"\x02ab1").unwrap();
        store.delete(b"\x02ab1").unwrap();
        assert_eq!(store.iterate(b"\x02ab").unwrap().len(), 1);
    }

    #[test]
    fn memory_store() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn sqlite_store() {
        exercise(&mut SqliteStore::open_in_memory().unwrap());
    }
}
