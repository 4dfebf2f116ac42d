//! Dual-tier persistent storage for intercepted resources.
//!
//! - A blob tier holds byte-for-byte responses in named namespaces, one live
//!   namespace per agent generation
//! - A structured tier holds decoded JSON records plus the version marker
//! - The tiers commit independently; there is no cross-tier transaction

#[cfg(test)]
pub mod faulty;
mod layer;
mod storage;
mod traits;

pub use layer::DualTierStore;
pub use storage::{SqliteBlobStore, SqliteRecordStore};
pub use traits::{BlobStore, CachedBlob, RawResponse, RecordStore, ResponseSource, VersionToken};
