//! Network access behind a small trait, so strategies can be tested offline.

mod client;
mod data_url;
#[cfg(test)]
pub mod mock;

use std::future::Future;
use thiserror::Error;

use crate::cache::RawResponse;
use crate::classify::Category;

pub use client::ReqwestFetcher;

/// How a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
  /// Regular request; the response status is inspected
  Standard,
  /// No credentials or referrer; the response is accepted as opaque
  ReducedFidelity,
}

impl FetchMode {
  /// Cross-origin resources are fetched with reduced fidelity.
  pub fn for_category(category: Category) -> Self {
    match category {
      Category::External => FetchMode::ReducedFidelity,
      _ => FetchMode::Standard,
    }
  }
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: String,
  pub mode: FetchMode,
  /// Ask every intermediate cache to stay out of the way
  pub bypass_cache: bool,
}

impl FetchRequest {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      mode: FetchMode::Standard,
      bypass_cache: false,
    }
  }

  pub fn with_mode(mut self, mode: FetchMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn no_store(mut self) -> Self {
    self.bypass_cache = true;
    self
  }
}

/// Fetch failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("request to {url} failed: {message}")]
  Transport { url: String, message: String },

  #[error("HTTP {status} from {url}")]
  Status { url: String, status: u16 },

  #[error("unsupported scheme in {0}")]
  UnsupportedScheme(String),

  #[error("invalid URL {url}: {message}")]
  InvalidUrl { url: String, message: String },

  #[error("failed to read body from {url}: {message}")]
  Body { url: String, message: String },

  #[error("failed to decode {url}: {message}")]
  Decode { url: String, message: String },
}

/// Something that can perform a network fetch.
pub trait Fetcher: Send + Sync + 'static {
  /// Send the request and return whatever the remote answered.
  ///
  /// Non-2xx statuses are returned as responses, not errors; only a
  /// request that produced no response at all is an `Err`.
  fn fetch(
    &self,
    request: &FetchRequest,
  ) -> impl Future<Output = Result<RawResponse, FetchError>> + Send;
}
