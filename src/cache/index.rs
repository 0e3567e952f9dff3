//! Persistent key → last-access index backing the LRU file cache.
//!
//! Stored as an SQLite database inside the cache directory. Rows are ordered
//! for eviction by `(last_access, access_seq)`, where `access_seq` increases
//! on every insert or refresh so that accesses within the same clock second
//! keep their relative order.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

pub(crate) const INDEX_FILE_NAME: &str = "index.sq3";

const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    last_access INTEGER NOT NULL,
    access_seq INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_lru ON cache (last_access, access_seq);
";

const MAX_SEQ: &str = "SELECT MAX(access_seq) FROM cache";
const KEY_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM cache WHERE key = ?1)";
const INSERT_KEY: &str = "INSERT INTO cache (key, last_access, access_seq) VALUES (?1, ?2, ?3)";
const TOUCH_KEY: &str = "UPDATE cache SET last_access = ?1, access_seq = ?2 WHERE key = ?3";
const LRU_KEY: &str = "SELECT key FROM cache ORDER BY last_access ASC, access_seq ASC LIMIT 1";
const DELETE_KEY: &str = "DELETE FROM cache WHERE key = ?1";
const LAST_ACCESS: &str = "SELECT last_access FROM cache WHERE key = ?1";
const ALL_KEYS: &str = "SELECT key FROM cache";
const COUNT_KEYS: &str = "SELECT COUNT(*) FROM cache";

/// Eviction index over the keys of one cache directory.
pub struct EvictionIndex {
    conn: Connection,
    last_seq: i64,
}

impl EvictionIndex {
    /// Open the index stored in `dir`, creating the database if absent.
    pub fn open(dir: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(dir.join(INDEX_FILE_NAME))?;
        conn.execute_batch(CREATE_SCHEMA)?;
        let last_seq: Option<i64> = conn.query_row(MAX_SEQ, [], |row| row.get(0))?;

        Ok(Self {
            conn,
            last_seq: last_seq.unwrap_or(0),
        })
    }

    pub fn contains(&self, key: &str) -> Result<bool, rusqlite::Error> {
        self.conn
            .prepare_cached(KEY_EXISTS)?
            .query_row([key], |row| row.get(0))
    }

    pub fn insert(&mut self, key: &str, timestamp: i64) -> Result<(), rusqlite::Error> {
        let seq = self.next_seq();
        self.conn
            .prepare_cached(INSERT_KEY)?
            .execute(params![key, timestamp, seq])?;
        Ok(())
    }

    /// Refresh the access time of `key`; returns `false` when the key is not indexed.
    pub fn touch(&mut self, key: &str, timestamp: i64) -> Result<bool, rusqlite::Error> {
        let seq = self.next_seq();
        let updated = self
            .conn
            .prepare_cached(TOUCH_KEY)?
            .execute(params![timestamp, seq, key])?;
        Ok(updated > 0)
    }

    /// The key with the oldest access, if any.
    pub fn least_recent(&self) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .prepare_cached(LRU_KEY)?
            .query_row([], |row| row.get(0))
            .optional()
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, rusqlite::Error> {
        let removed = self.conn.prepare_cached(DELETE_KEY)?.execute([key])?;
        Ok(removed > 0)
    }

    pub fn last_access(&self, key: &str) -> Result<Option<i64>, rusqlite::Error> {
        self.conn
            .prepare_cached(LAST_ACCESS)?
            .query_row([key], |row| row.get(0))
            .optional()
    }

    pub fn keys(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare_cached(ALL_KEYS)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    pub fn len(&self) -> Result<u64, rusqlite::Error> {
        let count: i64 = self.conn.query_row(COUNT_KEYS, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn is_empty(&self) -> Result<bool, rusqlite::Error> {
        Ok(self.len()? == 0)
    }

    fn next_seq(&mut self) -> i64 {
        self.last_seq += 1;
        self.last_seq
    }
}
