//! Store wrappers whose reads or writes can be switched to fail.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::layer::DualTierStore;
use super::storage::{SqliteBlobStore, SqliteRecordStore};
use super::traits::{BlobStore, CachedBlob, RawResponse, RecordStore};

#[derive(Default)]
pub struct Faults {
  reads: AtomicBool,
  writes: AtomicBool,
}

impl Faults {
  pub fn fail_reads(&self, fail: bool) {
    self.reads.store(fail, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.writes.store(fail, Ordering::SeqCst);
  }

  fn check_read(&self) -> Result<()> {
    if self.reads.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error"));
    }
    Ok(())
  }

  fn check_write(&self) -> Result<()> {
    if self.writes.load(Ordering::SeqCst) {
      return Err(eyre!("database or disk is full"));
    }
    Ok(())
  }
}

pub struct FaultyBlobStore {
  inner: SqliteBlobStore,
  pub faults: Faults,
}

impl BlobStore for FaultyBlobStore {
  fn open_namespace(&self, namespace: &str) -> Result<()> {
    self.faults.check_write()?;
    self.inner.open_namespace(namespace)
  }

  fn put(&self, namespace: &str, url: &str, response: &RawResponse) -> Result<()> {
    self.faults.check_write()?;
    self.inner.put(namespace, url, response)
  }

  fn get(&self, namespace: &str, url: &str) -> Result<Option<CachedBlob>> {
    self.faults.check_read()?;
    self.inner.get(namespace, url)
  }

  // Counting stays available so a primed store is still recognised
  fn count(&self, namespace: &str) -> Result<usize> {
    self.inner.count(namespace)
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    self.faults.check_read()?;
    self.inner.namespaces()
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    self.faults.check_write()?;
    self.inner.delete_namespace(namespace)
  }
}

pub struct FaultyRecordStore {
  inner: SqliteRecordStore,
  pub faults: Faults,
}

impl RecordStore for FaultyRecordStore {
  fn put(&self, key: &str, value: &Value) -> Result<()> {
    self.faults.check_write()?;
    self.inner.put(key, value)
  }

  fn get(&self, key: &str) -> Result<Option<Value>> {
    self.faults.check_read()?;
    self.inner.get(key)
  }

  fn count(&self) -> Result<usize> {
    self.inner.count()
  }
}

/// In-memory dual-tier store plus handles to toggle faults on each tier.
pub fn faulty_store(
  namespace: &str,
) -> (DualTierStore, Arc<FaultyBlobStore>, Arc<FaultyRecordStore>) {
  let blobs = Arc::new(FaultyBlobStore {
    inner: SqliteBlobStore::open_in_memory().unwrap(),
    faults: Faults::default(),
  });
  let records = Arc::new(FaultyRecordStore {
    inner: SqliteRecordStore::open_in_memory().unwrap(),
    faults: Faults::default(),
  });
  let store = DualTierStore::new(blobs.clone(), records.clone(), namespace);
  (store, blobs, records)
}
