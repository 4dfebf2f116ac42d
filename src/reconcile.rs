//! Version reconciliation loop.
//!
//! Every tick polls the backend version token and compares it with the
//! stored marker. On a change every discovered resource is re-fetched into
//! its tier, then the marker is swapped and connected views are notified.
//! The marker is only written after the refresh pass, so an interrupted pass
//! is detected again on the next tick.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::cache::{DualTierStore, VersionToken};
use crate::classify::{StructuredMatcher, UrlClassifier};
use crate::clients::{ClientMessage, ClientRegistry};
use crate::discovery::{Discovered, ResourceDiscovery};
use crate::net::{FetchMode, FetchRequest, Fetcher};

/// Default interval between version polls (10 seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// State carried from one reconciliation pass to the next.
#[derive(Debug, Default)]
pub struct ReconcileContext {
  /// Authoritative once read or written; rehydrated from the store when empty
  current_version: Option<VersionToken>,
  /// Last discovery set
  discovered: BTreeSet<String>,
}

impl ReconcileContext {
  /// Adopt a new discovery result. A partial result is merged into the
  /// previous set instead of replacing it.
  fn remember(&mut self, found: Discovered) {
    if found.complete {
      self.discovered = found.urls;
    } else {
      self.discovered.extend(found.urls);
    }
  }
}

/// Per-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
  pub stored: usize,
  pub failed: usize,
  pub skipped: usize,
}

enum WarmResult {
  Stored,
  Failed,
  Skipped,
}

impl WarmReport {
  fn record(&mut self, result: WarmResult) {
    match result {
      WarmResult::Stored => self.stored += 1,
      WarmResult::Failed => self.failed += 1,
      WarmResult::Skipped => self.skipped += 1,
    }
  }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
  /// Another pass holds the context
  Busy,
  /// Stores were empty or the marker unknown; a full prime ran
  Primed(WarmReport),
  Unchanged(VersionToken),
  Updated {
    from: VersionToken,
    to: VersionToken,
    report: WarmReport,
  },
  /// Version endpoint unreachable or malformed
  PollFailed,
  /// Resources were refreshed but the marker could not be persisted
  SwapFailed,
}

/// Polls the backend version and keeps both tiers in step with it.
pub struct Reconciler<F: Fetcher> {
  fetcher: Arc<F>,
  store: DualTierStore,
  discovery: ResourceDiscovery<F>,
  backend: BackendApi,
  classifier: UrlClassifier,
  structured: StructuredMatcher,
  clients: ClientRegistry,
  /// Single-flight guard around the pass state
  context: Mutex<ReconcileContext>,
  interval: Duration,
}

impl<F: Fetcher> Reconciler<F> {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    fetcher: Arc<F>,
    store: DualTierStore,
    discovery: ResourceDiscovery<F>,
    backend: BackendApi,
    classifier: UrlClassifier,
    structured: StructuredMatcher,
    clients: ClientRegistry,
  ) -> Self {
    Self {
      fetcher,
      store,
      discovery,
      backend,
      classifier,
      structured,
      clients,
      context: Mutex::new(ReconcileContext::default()),
      interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
    }
  }

  /// Sets a custom poll interval.
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  /// In-memory version marker, if known.
  #[cfg(test)]
  pub async fn current_version(&self) -> Option<VersionToken> {
    self.context.lock().await.current_version.clone()
  }

  /// Discover, fetch the version, populate both stores, then record the
  /// marker. Waits for any running pass to finish first.
  pub async fn prime(&self) -> WarmReport {
    let mut ctx = self.context.lock().await;
    self.prime_locked(&mut ctx).await
  }

  /// One pass of the loop. Skips immediately if another pass is running.
  pub async fn tick(&self) -> ReconcileOutcome {
    let Ok(mut ctx) = self.context.try_lock() else {
      debug!("reconciliation already in progress, skipping tick");
      return ReconcileOutcome::Busy;
    };

    if !self.is_primed() {
      info!("cache empty, priming");
      return ReconcileOutcome::Primed(self.prime_locked(&mut ctx).await);
    }

    let remote = match self.backend.fetch_version(self.fetcher.as_ref()).await {
      Ok(version) => version,
      Err(e) => {
        warn!(phase = "poll", error = %e, "version check failed");
        return ReconcileOutcome::PollFailed;
      }
    };

    if ctx.current_version.is_none() {
      ctx.current_version = match self.store.version_get() {
        Ok(stored) => stored,
        Err(e) => {
          warn!(phase = "rehydrate", error = %e, "failed to read version marker");
          None
        }
      };
    }

    let Some(local) = ctx.current_version.clone() else {
      info!("no version marker, priming");
      return ReconcileOutcome::Primed(self.prime_locked(&mut ctx).await);
    };

    if local == remote {
      debug!(version = %local, "version unchanged");
      return ReconcileOutcome::Unchanged(remote);
    }

    info!(from = %local, to = %remote, "version changed, refreshing resources");
    let report = self.refresh_all(&mut ctx).await;

    if let Err(e) = self.store.version_put(&remote) {
      warn!(phase = "swap", version = %remote, error = %e, "failed to persist version marker");
      return ReconcileOutcome::SwapFailed;
    }
    ctx.current_version = Some(remote.clone());

    self.notify(&remote);

    ReconcileOutcome::Updated {
      from: local,
      to: remote,
      report,
    }
  }

  /// Runs the loop until shutdown is signalled. The first tick fires
  /// immediately. A pass still running at shutdown is dropped; the marker
  /// has not been swapped yet, so the next start redoes it.
  pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
    info!(
      interval_secs = self.interval.as_secs(),
      "reconciliation loop starting"
    );

    let mut interval = tokio::time::interval(self.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
      tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
          info!("reconciliation loop shutting down");
          break;
        }

        _ = interval.tick() => {
          tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
              info!("reconciliation loop shutting down mid-pass");
              break;
            }

            outcome = self.tick() => {
              debug!(?outcome, "reconciliation tick finished");
            }
          }
        }
      }
    }
  }

  fn is_primed(&self) -> bool {
    match self.store.blob_count() {
      Ok(count) => count > 0,
      Err(e) => {
        warn!(phase = "check_primed", error = %e, "failed to inspect blob store");
        false
      }
    }
  }

  async fn prime_locked(&self, ctx: &mut ReconcileContext) -> WarmReport {
    let (discovered, version) = futures::join!(
      self.discovery.discover(),
      self.backend.fetch_version(self.fetcher.as_ref())
    );

    let version = match version {
      Ok(version) => Some(version),
      Err(e) => {
        warn!(phase = "prime", error = %e, "version unavailable while priming");
        None
      }
    };

    ctx.remember(discovered);
    let report = self.warm(&ctx.discovered).await;

    if let Some(version) = version {
      match self.store.version_put(&version) {
        Ok(()) => ctx.current_version = Some(version),
        Err(e) => warn!(phase = "prime", error = %e, "failed to persist version marker"),
      }
    }

    info!(
      stored = report.stored,
      failed = report.failed,
      skipped = report.skipped,
      "priming complete"
    );
    report
  }

  async fn refresh_all(&self, ctx: &mut ReconcileContext) -> WarmReport {
    // Rediscover: the new version may reference new resources
    let found = self.discovery.discover().await;
    ctx.remember(found);
    let report = self.warm(&ctx.discovered).await;

    info!(
      stored = report.stored,
      failed = report.failed,
      skipped = report.skipped,
      "refresh complete"
    );
    report
  }

  /// Fetch the root document and every URL in the set into their tiers.
  async fn warm(&self, urls: &BTreeSet<String>) -> WarmReport {
    let mut report = WarmReport::default();
    report.record(self.warm_one(self.discovery.root_url()).await);
    for url in urls {
      report.record(self.warm_one(url).await);
    }
    report
  }

  async fn warm_one(&self, url: &str) -> WarmResult {
    let classification = self.classifier.classify(url);
    if !classification.supported {
      return WarmResult::Skipped;
    }

    let key = self.classifier.resolve(url);
    let request = FetchRequest::new(key.clone())
      .with_mode(FetchMode::for_category(classification.category))
      .no_store();

    let response = match self.fetcher.fetch(&request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(url = %key, phase = "refresh", error = %e, "fetch failed");
        return WarmResult::Failed;
      }
    };

    if self.structured.is_structured(url) {
      if !response.is_ok() {
        warn!(url = %key, phase = "refresh", status = response.status, "not storing error response");
        return WarmResult::Failed;
      }
      let value = match serde_json::from_slice(&response.body) {
        Ok(value) => value,
        Err(e) => {
          warn!(url = %key, phase = "decode", error = %e, "keeping previous record");
          return WarmResult::Failed;
        }
      };
      if let Err(e) = self.store.struct_put(&key, &value) {
        warn!(url = %key, phase = "struct_put", error = %e, "failed to store record");
        return WarmResult::Failed;
      }
    } else {
      if !response.is_ok() && !response.opaque {
        warn!(url = %key, phase = "refresh", status = response.status, "not storing error response");
        return WarmResult::Failed;
      }
      if let Err(e) = self.store.blob_put(&key, &response) {
        warn!(url = %key, phase = "blob_put", error = %e, "failed to store response");
        return WarmResult::Failed;
      }
    }

    WarmResult::Stored
  }

  fn notify(&self, version: &VersionToken) {
    let message = ClientMessage::VersionChanged {
      version: version.clone(),
    };
    let delivered = self.clients.broadcast(&message);
    let reloaded = self.clients.reload_windows();
    info!(version = %version, delivered, reloaded, "clients notified");
  }
}
