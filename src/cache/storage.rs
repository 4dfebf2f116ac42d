//! SQLite implementations of the blob and record tiers.
//!
//! Each tier lives in its own database file with its own connection, so a
//! write commits atomically within its tier and nowhere else.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{BlobStore, CachedBlob, RawResponse, RecordStore};
use crate::db;

/// Schema for the blob tier.
const BLOB_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blob_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS blob_cache (
    namespace TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    opaque INTEGER NOT NULL DEFAULT 0,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, url_hash)
);
"#;

/// Schema for the structured tier.
const RECORD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS record_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
  conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// SHA256 of the URL for stable, fixed-length keys.
fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

/// SQLite-backed blob tier.
pub struct SqliteBlobStore {
  conn: Mutex<Connection>,
}

impl SqliteBlobStore {
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open_connection(path, BLOB_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = db::open_in_memory(BLOB_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl BlobStore for SqliteBlobStore {
  fn open_namespace(&self, namespace: &str) -> Result<()> {
    let conn = lock(&self.conn)?;
    conn
      .execute(
        "INSERT OR IGNORE INTO blob_namespaces (name) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to open namespace {}: {}", namespace, e))?;
    Ok(())
  }

  fn put(&self, namespace: &str, url: &str, response: &RawResponse) -> Result<()> {
    let conn = lock(&self.conn)?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO blob_namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to open namespace {}: {}", namespace, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO blob_cache (namespace, url_hash, url, status, headers, body, opaque, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        url_hash(url),
        url,
        response.status,
        headers,
        response.body,
        response.opaque
      ],
    )
    .map_err(|e| eyre!("Failed to store blob for {}: {}", url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, namespace: &str, url: &str) -> Result<Option<CachedBlob>> {
    let conn = lock(&self.conn)?;

    let row: Option<(u16, String, Vec<u8>, bool, String)> = conn
      .query_row(
        "SELECT status, headers, body, opaque, cached_at FROM blob_cache
         WHERE namespace = ? AND url_hash = ?",
        params![namespace, url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query blob for {}: {}", url, e))?;

    match row {
      Some((status, headers, body, opaque, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;
        let cached_at = db::parse_datetime(&cached_at_str)?;
        Ok(Some(CachedBlob {
          response: RawResponse {
            status,
            headers,
            body,
            opaque,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn count(&self, namespace: &str) -> Result<usize> {
    let conn = lock(&self.conn)?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM blob_cache WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count blobs: {}", e))?;
    Ok(count as usize)
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare(
        "SELECT name FROM blob_namespaces
         UNION
         SELECT DISTINCT namespace FROM blob_cache
         ORDER BY 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace: {}", e))?;

    Ok(names)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let entries = tx
      .execute(
        "DELETE FROM blob_cache WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete blobs in {}: {}", namespace, e))?;
    let registered = tx
      .execute(
        "DELETE FROM blob_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(entries > 0 || registered > 0)
  }
}

/// SQLite-backed structured tier.
pub struct SqliteRecordStore {
  conn: Mutex<Connection>,
}

impl SqliteRecordStore {
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open_connection(path, RECORD_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = db::open_in_memory(RECORD_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl RecordStore for SqliteRecordStore {
  fn put(&self, key: &str, value: &Value) -> Result<()> {
    let conn = lock(&self.conn)?;
    let data =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO record_store (key, value, cached_at)
         VALUES (?, ?, datetime('now'))",
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", key, e))?;

    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Value>> {
    let conn = lock(&self.conn)?;

    let data: Option<String> = conn
      .query_row(
        "SELECT value FROM record_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query record {}: {}", key, e))?;

    match data {
      Some(data) => {
        let value = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
        Ok(Some(value))
      }
      None => Ok(None),
    }
  }

  fn count(&self) -> Result<usize> {
    let conn = lock(&self.conn)?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM record_store", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count records: {}", e))?;
    Ok(count as usize)
  }
}
