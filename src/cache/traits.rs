//! Core traits and types for the two storage tiers.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// A full, byte-for-byte HTTP-like response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Cross-origin response whose status is not trusted for freshness decisions
  #[serde(default)]
  pub opaque: bool,
}

impl RawResponse {
  pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body: body.into(),
      opaque: false,
    }
  }

  /// Serialize a structured value into a JSON response.
  pub fn json(status: u16, value: &Value) -> Self {
    // Serializing a `Value` cannot fail
    let body = serde_json::to_vec(value).unwrap_or_default();
    Self::new(status, "application/json", body)
  }

  /// The response served when neither network nor cache can answer.
  pub fn unavailable() -> Self {
    Self::new(503, "text/plain", "Service Unavailable")
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A blob-tier entry.
#[derive(Debug, Clone)]
pub struct CachedBlob {
  pub response: RawResponse,
  /// When the entry was last written
  pub cached_at: DateTime<Utc>,
}

/// Opaque version token published by the backend.
///
/// The backend may send either a JSON string or a JSON number; both are
/// compared by their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Convert a loose JSON scalar into a token.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(s) => Some(Self(s.clone())),
      Value::Number(n) => Some(Self(n.to_string())),
      Value::Bool(b) => Some(Self(b.to_string())),
      _ => None,
    }
  }
}

impl fmt::Display for VersionToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl<'de> Deserialize<'de> for VersionToken {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let value = Value::deserialize(deserializer)?;
    Self::from_value(&value)
      .ok_or_else(|| serde::de::Error::custom(format!("invalid version token: {}", value)))
  }
}

/// Indicates where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from a store without touching the network
  Cache,
  /// Offline mode - network failed, serving a previously cached entry
  Offline,
  /// Built locally because nothing else could answer
  Synthesized,
}

/// Blob tier: raw responses grouped into named namespaces, keyed by URL.
pub trait BlobStore: Send + Sync {
  /// Make sure a namespace exists, even if it holds no entries yet.
  fn open_namespace(&self, namespace: &str) -> Result<()>;

  /// Store a response, replacing any previous entry for the URL.
  fn put(&self, namespace: &str, url: &str, response: &RawResponse) -> Result<()>;

  /// Look up a response by URL.
  fn get(&self, namespace: &str, url: &str) -> Result<Option<CachedBlob>>;

  /// Number of entries in a namespace.
  fn count(&self, namespace: &str) -> Result<usize>;

  /// All known namespace names.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Remove a namespace and every entry in it. Returns whether it existed.
  fn delete_namespace(&self, namespace: &str) -> Result<bool>;
}

/// Structured tier: decoded JSON records keyed by URL (or a reserved name).
pub trait RecordStore: Send + Sync {
  /// Store a record, replacing any previous value.
  fn put(&self, key: &str, value: &Value) -> Result<()>;

  /// Look up a record.
  fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Number of stored records.
  fn count(&self) -> Result<usize>;
}
