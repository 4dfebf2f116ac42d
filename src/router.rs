//! Request router: picks a fetch/cache strategy for every intercepted request.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{DualTierStore, RawResponse, ResponseSource};
use crate::classify::{Category, StructuredMatcher, UrlClassifier};
use crate::net::{FetchMode, FetchRequest, Fetcher};

/// A request handed to the agent by a client view.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
  pub url: String,
  /// Top-level page navigation
  pub navigate: bool,
}

impl InterceptedRequest {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      navigate: false,
    }
  }

  pub fn navigation(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      navigate: true,
    }
  }
}

/// The answer to an intercepted request.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
  pub response: RawResponse,
  pub source: ResponseSource,
}

impl RoutedResponse {
  fn network(response: RawResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  fn cached(response: RawResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  fn offline(response: RawResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
    }
  }

  fn synthesized(response: RawResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
    }
  }
}

/// Strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Forward untouched, never cache
  UnsupportedPassthrough,
  /// Structured store first, network on miss
  Structured,
  /// Network first, blob fallback
  Backend,
  /// Blob store first, network on miss
  Default,
}

/// Serves intercepted requests from the stores and the network.
pub struct RequestRouter<F: Fetcher> {
  fetcher: Arc<F>,
  store: DualTierStore,
  classifier: UrlClassifier,
  structured: StructuredMatcher,
  /// Absolute URL of the root document, used for navigation fallback
  root_url: String,
}

impl<F: Fetcher> RequestRouter<F> {
  pub fn new(
    fetcher: Arc<F>,
    store: DualTierStore,
    classifier: UrlClassifier,
    structured: StructuredMatcher,
    root_url: String,
  ) -> Self {
    Self {
      fetcher,
      store,
      classifier,
      structured,
      root_url,
    }
  }

  pub fn select(&self, url: &str) -> (Strategy, Category) {
    let classification = self.classifier.classify(url);
    let strategy = if !classification.supported {
      Strategy::UnsupportedPassthrough
    } else if self.structured.is_structured(url) {
      Strategy::Structured
    } else if classification.category == Category::Backend {
      Strategy::Backend
    } else {
      Strategy::Default
    };
    (strategy, classification.category)
  }

  /// Answer a request. Never fails: the worst case is a synthesized
  /// unavailable response.
  pub async fn handle(&self, request: &InterceptedRequest) -> RoutedResponse {
    let (strategy, category) = self.select(&request.url);
    debug!(url = %request.url, ?strategy, ?category, "routing request");

    let routed = match strategy {
      Strategy::UnsupportedPassthrough => self.passthrough(&request.url).await,
      Strategy::Structured => self.structured_first(&request.url, category).await,
      Strategy::Backend => self.network_first(&request.url).await,
      Strategy::Default => self.cache_first(&request.url, category).await,
    };

    if request.navigate && routed.source == ResponseSource::Synthesized {
      if let Some(root) = self.cached_blob(&self.root_url) {
        debug!(url = %request.url, "navigation served from cached root document");
        return RoutedResponse::offline(root);
      }
    }

    routed
  }

  async fn passthrough(&self, url: &str) -> RoutedResponse {
    match self.fetcher.fetch(&FetchRequest::new(url)).await {
      Ok(response) => RoutedResponse::network(response),
      Err(e) => {
        debug!(url, error = %e, "passthrough failed");
        RoutedResponse::synthesized(RawResponse::unavailable())
      }
    }
  }

  async fn structured_first(&self, url: &str, category: Category) -> RoutedResponse {
    let key = self.classifier.resolve(url);

    match self.store.struct_get(&key) {
      Ok(Some(value)) => return RoutedResponse::cached(RawResponse::json(200, &value)),
      Ok(None) => {}
      Err(e) => warn!(url = %key, phase = "struct_get", error = %e, "structured lookup failed"),
    }

    let request = FetchRequest::new(key.clone()).with_mode(FetchMode::for_category(category));
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() {
          match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => self.persist_struct(&key, &value),
            Err(e) => warn!(url = %key, phase = "decode", error = %e, "not caching malformed payload"),
          }
        }
        RoutedResponse::network(response)
      }
      Err(e) => {
        warn!(url = %key, phase = "fetch", error = %e, "structured fetch failed");
        RoutedResponse::synthesized(RawResponse::json(500, &json!({ "error": e.to_string() })))
      }
    }
  }

  async fn network_first(&self, url: &str) -> RoutedResponse {
    let key = self.classifier.resolve(url);

    match self.fetcher.fetch(&FetchRequest::new(key.clone())).await {
      Ok(response) if response.is_ok() => {
        self.persist_blob(&key, &response);
        RoutedResponse::network(response)
      }
      Ok(response) => {
        // Backend answered with an error status; prefer what we have
        match self.cached_blob(&key) {
          Some(cached) => RoutedResponse::offline(cached),
          None => RoutedResponse::network(response),
        }
      }
      Err(e) => {
        debug!(url = %key, error = %e, "backend unreachable, trying cache");
        match self.cached_blob(&key) {
          Some(cached) => RoutedResponse::offline(cached),
          None => RoutedResponse::synthesized(RawResponse::unavailable()),
        }
      }
    }
  }

  async fn cache_first(&self, url: &str, category: Category) -> RoutedResponse {
    let key = self.classifier.resolve(url);

    if let Some(cached) = self.cached_blob(&key) {
      return RoutedResponse::cached(cached);
    }

    let request = FetchRequest::new(key.clone()).with_mode(FetchMode::for_category(category));
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() || response.opaque {
          self.persist_blob(&key, &response);
        }
        RoutedResponse::network(response)
      }
      Err(e) => {
        debug!(url = %key, error = %e, "fetch failed with nothing cached");
        RoutedResponse::synthesized(RawResponse::unavailable())
      }
    }
  }

  fn cached_blob(&self, key: &str) -> Option<RawResponse> {
    match self.store.blob_get(key) {
      Ok(entry) => entry.map(|e| e.response),
      Err(e) => {
        warn!(url = %key, phase = "blob_get", error = %e, "blob lookup failed");
        None
      }
    }
  }

  fn persist_blob(&self, key: &str, response: &RawResponse) {
    if !self.classifier.is_supported(key) {
      return;
    }
    if let Err(e) = self.store.blob_put(key, response) {
      warn!(url = %key, phase = "blob_put", error = %e, "failed to cache response");
    }
  }

  fn persist_struct(&self, key: &str, value: &Value) {
    if !self.classifier.is_supported(key) {
      return;
    }
    if let Err(e) = self.store.struct_put(key, value) {
      warn!(url = %key, phase = "struct_put", error = %e, "failed to cache record");
    }
  }
}
