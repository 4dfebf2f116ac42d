//! Scripted fetcher for tests.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{FetchError, FetchMode, FetchRequest, Fetcher};
use crate::cache::RawResponse;

/// Mock fetcher that serves canned responses and records every request.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, RawResponse>>,
  calls: Mutex<Vec<FetchRequest>>,
  hanging: Mutex<HashSet<String>>,
  offline: AtomicBool,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: RawResponse) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn respond_text(&self, url: &str, content_type: &str, body: &str) {
    self.respond(url, RawResponse::new(200, content_type, body));
  }

  pub fn respond_json(&self, url: &str, value: &Value) {
    self.respond(url, RawResponse::json(200, value));
  }

  /// Unroutable URLs fail at the transport level.
  pub fn forget(&self, url: &str) {
    self.routes.lock().unwrap().remove(url);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Requests for `url` never complete until released.
  pub fn hang_on(&self, url: &str) {
    self.hanging.lock().unwrap().insert(url.to_string());
  }

  pub fn release(&self, url: &str) {
    self.hanging.lock().unwrap().remove(url);
  }

  pub fn calls(&self) -> Vec<FetchRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url == url)
      .count()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }
}

impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
    self.calls.lock().unwrap().push(request.clone());

    let hanging = self.hanging.lock().unwrap().contains(&request.url);
    if hanging {
      std::future::pending::<()>().await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::Transport {
        url: request.url.clone(),
        message: "network unreachable".into(),
      });
    }

    let route = self.routes.lock().unwrap().get(&request.url).cloned();
    match route {
      Some(mut response) => {
        response.opaque = request.mode == FetchMode::ReducedFidelity;
        Ok(response)
      }
      None => Err(FetchError::Transport {
        url: request.url.clone(),
        message: "no route".into(),
      }),
    }
  }
}
