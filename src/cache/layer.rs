//! Dual-tier store that the router and the reconciliation loop share.

use color_eyre::Result;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use super::storage::{SqliteBlobStore, SqliteRecordStore};
use super::traits::{BlobStore, CachedBlob, RawResponse, RecordStore, VersionToken};

/// Record name holding the version marker in the structured tier.
pub const VERSION_MARKER_KEY: &str = "currentVersion";

/// Blob tier plus structured tier, addressed by URL.
///
/// The tiers commit independently. A structured record and a blob written
/// for related resources are not atomic with respect to each other; callers
/// must tolerate seeing one without the other.
pub struct DualTierStore {
  blobs: Arc<dyn BlobStore>,
  records: Arc<dyn RecordStore>,
  /// Live blob namespace for this agent generation
  namespace: String,
}

impl DualTierStore {
  /// Create a store from two tier implementations.
  pub fn new(
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    namespace: impl Into<String>,
  ) -> Self {
    Self {
      blobs,
      records,
      namespace: namespace.into(),
    }
  }

  /// Open both tiers as SQLite files under `dir`.
  pub fn open(dir: &Path, namespace: &str) -> Result<Self> {
    let blobs = SqliteBlobStore::open(&dir.join("blobs.db"))?;
    let records = SqliteRecordStore::open(&dir.join("records.db"))?;
    Ok(Self::new(Arc::new(blobs), Arc::new(records), namespace))
  }

  /// Open both tiers in memory.
  pub fn in_memory(namespace: &str) -> Result<Self> {
    let blobs = SqliteBlobStore::open_in_memory()?;
    let records = SqliteRecordStore::open_in_memory()?;
    Ok(Self::new(Arc::new(blobs), Arc::new(records), namespace))
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn blob_put(&self, url: &str, response: &RawResponse) -> Result<()> {
    self.blobs.put(&self.namespace, url, response)
  }

  pub fn blob_get(&self, url: &str) -> Result<Option<CachedBlob>> {
    self.blobs.get(&self.namespace, url)
  }

  pub fn blob_count(&self) -> Result<usize> {
    self.blobs.count(&self.namespace)
  }

  pub fn struct_put(&self, url: &str, value: &Value) -> Result<()> {
    self.records.put(url, value)
  }

  pub fn struct_get(&self, url: &str) -> Result<Option<Value>> {
    self.records.get(url)
  }

  /// Structured records, excluding the version marker.
  pub fn struct_count(&self) -> Result<usize> {
    let total = self.records.count()?;
    let marker = usize::from(self.records.get(VERSION_MARKER_KEY)?.is_some());
    Ok(total - marker)
  }

  pub fn version_put(&self, token: &VersionToken) -> Result<()> {
    self
      .records
      .put(VERSION_MARKER_KEY, &Value::String(token.as_str().to_string()))
  }

  pub fn version_get(&self) -> Result<Option<VersionToken>> {
    Ok(
      self
        .records
        .get(VERSION_MARKER_KEY)?
        .as_ref()
        .and_then(VersionToken::from_value),
    )
  }

  /// Make sure the live namespace is registered.
  pub fn open_live_namespace(&self) -> Result<()> {
    self.blobs.open_namespace(&self.namespace)
  }

  /// Delete every blob namespace except `keep`. Returns the deleted names.
  pub fn evict_except(&self, keep: &str) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.blobs.namespaces()? {
      if name != keep && self.blobs.delete_namespace(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

impl Clone for DualTierStore {
  fn clone(&self) -> Self {
    Self {
      blobs: Arc::clone(&self.blobs),
      records: Arc::clone(&self.records),
      namespace: self.namespace.clone(),
    }
  }
}
