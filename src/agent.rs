use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::BackendApi;
use crate::cache::DualTierStore;
use crate::classify::{StructuredMatcher, UrlClassifier};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::discovery::ResourceDiscovery;
use crate::lifecycle::{ActivationReport, LifecycleController};
use crate::net::{Fetcher, ReqwestFetcher};
use crate::reconcile::{Reconciler, WarmReport};
use crate::router::{InterceptedRequest, RequestRouter, RoutedResponse};

/// The cache agent: router, reconciliation loop and lifecycle wired to one
/// store and one client registry.
pub struct Agent<F: Fetcher> {
  store: DualTierStore,
  clients: ClientRegistry,
  router: RequestRouter<F>,
  reconciler: Arc<Reconciler<F>>,
  lifecycle: LifecycleController<F>,
}

impl Agent<ReqwestFetcher> {
  /// Open the on-disk stores and a reqwest fetcher for the given config.
  pub fn open(config: &Config) -> Result<Self> {
    let fetcher = Arc::new(ReqwestFetcher::new(config.request_timeout())?);
    let store = DualTierStore::open(&config.data_dir()?, &config.namespace())?;
    Self::new(config, fetcher, store)
  }
}

impl<F: Fetcher> Agent<F> {
  pub fn new(config: &Config, fetcher: Arc<F>, store: DualTierStore) -> Result<Self> {
    let classifier = UrlClassifier::new(&config.backend_url, &config.origin)?;
    let structured = StructuredMatcher::new(&config.structured_suffix, &config.manifest_name);
    let backend = BackendApi::new(&config.backend_url);
    let clients = ClientRegistry::new();
    let root_url = classifier.resolve(&config.root_document);

    let router = RequestRouter::new(
      Arc::clone(&fetcher),
      store.clone(),
      classifier.clone(),
      structured.clone(),
      root_url.clone(),
    );

    let discovery = ResourceDiscovery::new(
      Arc::clone(&fetcher),
      classifier.clone(),
      backend.clone(),
      root_url,
      config.precache.clone(),
    );

    let reconciler = Arc::new(
      Reconciler::new(
        fetcher,
        store.clone(),
        discovery,
        backend,
        classifier,
        structured,
        clients.clone(),
      )
      .with_interval(config.poll_interval()),
    );

    let lifecycle =
      LifecycleController::new(Arc::clone(&reconciler), store.clone(), clients.clone());

    Ok(Self {
      store,
      clients,
      router,
      reconciler,
      lifecycle,
    })
  }

  /// Install then activate immediately.
  pub async fn start(&self) -> Result<(WarmReport, ActivationReport)> {
    let warmed = self.lifecycle.install().await;
    debug!(
      state = ?self.lifecycle.state(),
      skip_waiting = self.lifecycle.wants_immediate_activation(),
      "install finished"
    );
    let activated = self.lifecycle.activate()?;
    Ok((warmed, activated))
  }

  /// Run the activation step alone.
  pub fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle.activate()
  }

  /// Start the periodic reconciliation loop.
  pub fn spawn_reconciliation(&self, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(Arc::clone(&self.reconciler).run(shutdown))
  }

  /// Route one intercepted request.
  pub async fn handle(&self, request: &InterceptedRequest) -> RoutedResponse {
    self.router.handle(request).await
  }

  pub fn store(&self) -> &DualTierStore {
    &self.store
  }

  pub fn clients(&self) -> &ClientRegistry {
    &self.clients
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, VersionToken};
  use crate::clients::{ClientEvent, ClientKind, ClientMessage};
  use crate::lifecycle::LifecycleState;
  use crate::net::mock::MockFetcher;
  use serde_json::json;
  use std::time::Duration;

  fn config() -> Config {
    Config {
      poll_interval_secs: 1,
      ..Config::default()
    }
  }

  fn serve(fetcher: &MockFetcher, version: &str) {
    fetcher.respond_text(
      "http://localhost:8080/",
      "text/html",
      r#"<link rel="stylesheet" href="/style.css"><script src="/kiosk.js"></script>"#,
    );
    fetcher.respond_text("http://localhost:8080/style.css", "text/css", "body{}");
    fetcher.respond_text("http://localhost:8080/kiosk.js", "text/javascript", version);
    fetcher.respond_json("http://localhost:5000/projects", &json!([{"id": 42}]));
    fetcher.respond_json(
      "http://localhost:5000/content/42",
      &json!({"version": version, "data": "hi"}),
    );
    fetcher.respond_json("http://localhost:5000/version", &json!({ "version": version }));
  }

  #[tokio::test]
  async fn started_agent_serves_everything_offline() {
    let fetcher = Arc::new(MockFetcher::new());
    serve(&fetcher, "1");
    let agent = Agent::new(
      &config(),
      fetcher.clone(),
      DualTierStore::in_memory("kiosk-cache-v1").unwrap(),
    )
    .unwrap();

    let (warmed, activated) = agent.start().await.unwrap();
    assert_eq!(warmed.failed, 0);
    assert_eq!(agent.lifecycle.state(), LifecycleState::Activated);
    assert!(activated.evicted.is_empty());

    fetcher.set_offline(true);
    for url in ["/", "/style.css", "/kiosk.js", "http://localhost:5000/content/42"] {
      let routed = agent.handle(&InterceptedRequest::new(url)).await;
      assert!(routed.response.is_ok(), "{url}");
      assert_ne!(routed.source, ResponseSource::Synthesized, "{url}");
    }
  }

  #[tokio::test]
  async fn reconciliation_loop_notifies_views() {
    let fetcher = Arc::new(MockFetcher::new());
    serve(&fetcher, "1");
    let agent = Agent::new(
      &config(),
      fetcher.clone(),
      DualTierStore::in_memory("kiosk-cache-v1").unwrap(),
    )
    .unwrap();
    agent.start().await.unwrap();

    let mut view = agent
      .clients()
      .register(ClientKind::Window, "http://localhost:8080/42");
    serve(&fetcher, "2");

    let shutdown = CancellationToken::new();
    let handle = agent.spawn_reconciliation(shutdown.clone());

    let event = tokio::time::timeout(Duration::from_secs(5), view.next())
      .await
      .unwrap();
    assert_eq!(
      event,
      Some(ClientEvent::Message(ClientMessage::VersionChanged {
        version: VersionToken::new("2")
      }))
    );
    assert_eq!(
      agent.store().version_get().unwrap(),
      Some(VersionToken::new("2"))
    );

    shutdown.cancel();
    handle.await.unwrap();
  }
}
