//! Discovery of resources worth pre-warming.
//!
//! The root document is scanned for stylesheets, scripts and images. The
//! backend catalog (project list plus each project's content) and the
//! configured precache list are added on top. The resulting set is a cache
//! of work to do, never a source of truth.

mod markup;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::BackendApi;
use crate::classify::UrlClassifier;
use crate::net::{FetchRequest, Fetcher};

pub use markup::{MarkupParser, TagScanner};

/// Result of one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
  pub urls: BTreeSet<String>,
  /// Both the root document and the backend catalog were read
  pub complete: bool,
}

/// Finds the URLs referenced by the root document.
pub struct ResourceDiscovery<F: Fetcher> {
  fetcher: Arc<F>,
  classifier: UrlClassifier,
  parser: Box<dyn MarkupParser>,
  backend: BackendApi,
  /// Absolute URL of the root document
  root_url: String,
  precache: Vec<String>,
}

impl<F: Fetcher> ResourceDiscovery<F> {
  pub fn new(
    fetcher: Arc<F>,
    classifier: UrlClassifier,
    backend: BackendApi,
    root_url: String,
    precache: Vec<String>,
  ) -> Self {
    Self {
      fetcher,
      classifier,
      parser: Box::new(TagScanner),
      backend,
      root_url,
      precache,
    }
  }

  /// Replace the markup parser.
  #[cfg(test)]
  pub fn with_parser(mut self, parser: Box<dyn MarkupParser>) -> Self {
    self.parser = parser;
    self
  }

  pub fn root_url(&self) -> &str {
    &self.root_url
  }

  /// Build a fresh discovery set.
  ///
  /// Never fails: an unreachable root document or backend catalog is
  /// logged and the partial set is returned with `complete` unset.
  pub async fn discover(&self) -> Discovered {
    let mut urls = BTreeSet::new();

    let root_scanned = match self.fetch_root().await {
      Ok(html) => {
        urls.extend(self.extract_resources(&html));
        true
      }
      Err(message) => {
        warn!(url = %self.root_url, phase = "discover", "{}", message);
        false
      }
    };

    urls.extend(
      self
        .precache
        .iter()
        .filter(|url| self.classifier.is_supported(url))
        .cloned(),
    );

    let catalog = self.catalog_urls().await;
    let catalog_read = catalog.is_some();
    urls.extend(catalog.into_iter().flatten());

    let complete = root_scanned && catalog_read;
    debug!(count = urls.len(), complete, "discovery finished");
    Discovered { urls, complete }
  }

  /// Supported resource references in a document, protocol-relative URLs
  /// normalized to https.
  pub fn extract_resources(&self, html: &str) -> BTreeSet<String> {
    let elements = self.parser.parse(html);

    let stylesheets = elements.iter().filter_map(|e| {
      let is_stylesheet = e.name == "link"
        && e
          .attr("rel")
          .is_some_and(|rel| rel.split_ascii_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
      is_stylesheet.then(|| e.attr("href")).flatten()
    });
    let scripts = elements
      .iter()
      .filter(|e| e.name == "script")
      .filter_map(|e| e.attr("src"));
    let images = elements
      .iter()
      .filter(|e| e.name == "img")
      .filter_map(|e| e.attr("src"));

    stylesheets
      .chain(scripts)
      .chain(images)
      .map(str::trim)
      .filter(|url| !url.is_empty())
      .map(normalize_protocol_relative)
      .filter(|url| self.classifier.is_supported(url))
      .collect()
  }

  async fn fetch_root(&self) -> Result<String, String> {
    let request = FetchRequest::new(self.root_url.clone()).no_store();
    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| format!("root document unavailable: {}", e))?;

    if !response.is_ok() {
      return Err(format!("root document returned HTTP {}", response.status));
    }

    String::from_utf8(response.body).map_err(|e| format!("root document is not UTF-8: {}", e))
  }

  /// Project list plus one content URL per project.
  async fn catalog_urls(&self) -> Option<Vec<String>> {
    match self.backend.fetch_projects(self.fetcher.as_ref()).await {
      Ok(projects) => {
        let mut urls = vec![self.backend.projects_url()];
        for project in projects {
          debug!(project = %project.id, version = ?project.version, "catalog entry");
          urls.push(self.backend.content_url(&project.id));
        }
        Some(urls)
      }
      Err(e) => {
        warn!(phase = "discover", error = %e, "backend catalog unavailable");
        None
      }
    }
  }
}

/// `//host/path` becomes `https://host/path`.
fn normalize_protocol_relative(url: &str) -> String {
  match url.strip_prefix("//") {
    Some(rest) => format!("https://{}", rest),
    None => url.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::classify::Category;
  use crate::net::mock::MockFetcher;
  use serde_json::json;

  const ROOT: &str = "http://localhost:8080/";

  fn discovery(fetcher: Arc<MockFetcher>, precache: Vec<String>) -> ResourceDiscovery<MockFetcher> {
    let classifier = UrlClassifier::new("http://localhost:5000", "http://localhost:8080").unwrap();
    ResourceDiscovery::new(
      fetcher,
      classifier,
      BackendApi::new("http://localhost:5000"),
      ROOT.to_string(),
      precache,
    )
  }

  const PAGE: &str = r#"<html><head>
    <link rel="stylesheet" href="//cdn.example.com/a.css">
    <link rel="icon" href="/favicon.ico">
    <link rel="manifest" href="/manifest.json">
    <script src="/kiosk.js"></script>
    <script src="chrome-extension://abcdef/inject.js"></script>
  </head><body><img src="/img/logo.png"><img src="/img/logo.png"></body></html>"#;

  #[test]
  fn extracts_three_reference_kinds() {
    let d = discovery(Arc::new(MockFetcher::new()), Vec::new());
    let urls = d.extract_resources(PAGE);
    let expected: BTreeSet<String> = [
      "https://cdn.example.com/a.css",
      "/kiosk.js",
      "/img/logo.png",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(urls, expected);
  }

  #[test]
  fn protocol_relative_stylesheet_is_external_https() {
    let d = discovery(Arc::new(MockFetcher::new()), Vec::new());
    let urls = d.extract_resources(r#"<link rel="stylesheet" href="//cdn.example.com/a.css">"#);
    assert!(urls.contains("https://cdn.example.com/a.css"));
    assert_eq!(
      d.classifier.classify("https://cdn.example.com/a.css").category,
      Category::External
    );
  }

  #[tokio::test]
  async fn discover_combines_markup_catalog_and_precache() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond_text(ROOT, "text/html", PAGE);
    fetcher.respond_json("http://localhost:5000/projects", &json!([{"id": 42, "version": "1"}]));

    let d = discovery(
      fetcher.clone(),
      vec!["/style.css".into(), "moz-extension://x/y".into()],
    );
    let found = d.discover().await;
    assert!(found.complete);
    let urls = found.urls;

    assert!(urls.contains("/kiosk.js"));
    assert!(urls.contains("/style.css"));
    assert!(!urls.contains("moz-extension://x/y"));
    assert!(urls.contains("http://localhost:5000/projects"));
    assert!(urls.contains("http://localhost:5000/content/42"));
  }

  #[tokio::test]
  async fn discover_fails_soft_when_offline() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.set_offline(true);

    let d = discovery(fetcher, vec!["/style.css".into()]);
    let found = d.discover().await;

    assert!(!found.complete);
    assert_eq!(
      found.urls.into_iter().collect::<Vec<_>>(),
      vec!["/style.css".to_string()]
    );
  }

  #[tokio::test]
  async fn missing_catalog_marks_discovery_incomplete() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond_text(ROOT, "text/html", PAGE);

    let found = discovery(fetcher, Vec::new()).discover().await;

    assert!(!found.complete);
    assert!(found.urls.contains("/kiosk.js"));
  }

  struct ImagesOnly;

  impl MarkupParser for ImagesOnly {
    fn parse(&self, html: &str) -> Vec<markup::MarkupElement> {
      TagScanner
        .parse(html)
        .into_iter()
        .filter(|e| e.name == "img")
        .collect()
    }
  }

  #[test]
  fn custom_parser_replaces_tag_scanner() {
    let d = discovery(Arc::new(MockFetcher::new()), Vec::new()).with_parser(Box::new(ImagesOnly));
    let urls = d.extract_resources(PAGE);
    assert_eq!(urls.into_iter().collect::<Vec<_>>(), vec!["/img/logo.png".to_string()]);
  }
}
