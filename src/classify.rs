//! URL classification: scheme support and traffic category.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Traffic category of a request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
  /// Resolves within the agent's own origin
  Local,
  /// Served by the configured backend
  Backend,
  /// Any other fetchable origin
  External,
  /// A scheme the agent never fetches or stores
  Unsupported,
}

/// Result of classifying a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
  pub supported: bool,
  pub category: Category,
}

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "data"];

/// Pure URL classifier.
#[derive(Debug, Clone)]
pub struct UrlClassifier {
  backend: Url,
  origin: Url,
}

impl UrlClassifier {
  pub fn new(backend_origin: &str, origin: &str) -> Result<Self> {
    let backend = Url::parse(backend_origin)
      .map_err(|e| eyre!("Invalid backend URL '{}': {}", backend_origin, e))?;
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
    Ok(Self { backend, origin })
  }

  pub fn classify(&self, url: &str) -> Classification {
    // Relative or unparsable: same-origin traffic, fail open
    let Ok(parsed) = Url::parse(url) else {
      return Classification {
        supported: true,
        category: Category::Local,
      };
    };

    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
      return Classification {
        supported: false,
        category: Category::Unsupported,
      };
    }

    let category = if parsed.origin() == self.backend.origin() {
      Category::Backend
    } else {
      Category::External
    };

    Classification {
      supported: true,
      category,
    }
  }

  pub fn is_supported(&self, url: &str) -> bool {
    self.classify(url).supported
  }

  /// Absolute form of a URL, used as the storage identity.
  ///
  /// Scheme-less URLs are joined onto the agent's origin; anything that
  /// already parses is returned unchanged.
  pub fn resolve(&self, url: &str) -> String {
    if Url::parse(url).is_ok() {
      return url.to_string();
    }
    match self.origin.join(url) {
      Ok(joined) => joined.to_string(),
      Err(_) => url.to_string(),
    }
  }
}

/// Decides which URLs hold structured (JSON) payloads.
#[derive(Debug, Clone)]
pub struct StructuredMatcher {
  suffix: String,
  manifest_name: String,
}

impl StructuredMatcher {
  pub fn new(suffix: &str, manifest_name: &str) -> Self {
    Self {
      suffix: suffix.to_ascii_lowercase(),
      manifest_name: manifest_name.to_ascii_lowercase(),
    }
  }

  /// Path ends with the structured suffix and is not the manifest.
  pub fn is_structured(&self, url: &str) -> bool {
    let path = url_path(url).to_ascii_lowercase();
    if !path.ends_with(&self.suffix) {
      return false;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path.as_str());
    file_name != self.manifest_name
  }
}

/// URL without query string or fragment.
fn url_path(url: &str) -> &str {
  let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
  &url[..end]
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> UrlClassifier {
    UrlClassifier::new("http://localhost:5000", "http://localhost:8080").unwrap()
  }

  #[test]
  fn scheme_less_urls_are_local() {
    let c = classifier();
    for url in ["/index.html", "style.css", "./img/logo.png", "", "//cdn.example.com/a.css"] {
      assert_eq!(
        c.classify(url),
        Classification {
          supported: true,
          category: Category::Local
        },
        "{url}"
      );
    }
  }

  #[test]
  fn backend_prefix_is_backend() {
    let c = classifier();
    assert_eq!(
      c.classify("http://localhost:5000/content/42").category,
      Category::Backend
    );
    assert_eq!(
      c.classify("http://localhost:5000/version").category,
      Category::Backend
    );
  }

  #[test]
  fn backend_match_respects_origin_boundary() {
    let c = classifier();
    for url in [
      "http://localhost:50001/x",
      "http://localhost:5000.evil.com/x",
      "https://localhost:5000/version",
    ] {
      assert_eq!(c.classify(url).category, Category::External, "{url}");
    }
    assert_eq!(
      c.classify("http://localhost:5000?x=1").category,
      Category::Backend
    );
  }

  #[test]
  fn other_http_and_data_are_external() {
    let c = classifier();
    for url in [
      "https://cdn.example.com/a.css",
      "http://localhost:8080/index.html",
      "data:text/plain,hello",
    ] {
      let result = c.classify(url);
      assert!(result.supported, "{url}");
      assert_eq!(result.category, Category::External, "{url}");
    }
  }

  #[test]
  fn unknown_schemes_are_unsupported() {
    let c = classifier();
    for url in [
      "chrome-extension://abcdef/script.js",
      "moz-extension://abc/x",
      "ftp://files.example.com/a",
      "file:///etc/passwd",
    ] {
      assert_eq!(
        c.classify(url),
        Classification {
          supported: false,
          category: Category::Unsupported
        },
        "{url}"
      );
    }
  }

  #[test]
  fn resolve_joins_relative_urls_onto_origin() {
    let c = classifier();
    assert_eq!(c.resolve("/style.css"), "http://localhost:8080/style.css");
    assert_eq!(c.resolve("img/a.png"), "http://localhost:8080/img/a.png");
    assert_eq!(
      c.resolve("https://cdn.example.com/a.css"),
      "https://cdn.example.com/a.css"
    );
  }

  #[test]
  fn structured_matcher_exempts_manifest() {
    let m = StructuredMatcher::new(".json", "manifest.json");
    assert!(m.is_structured("http://localhost:5000/data.json"));
    assert!(m.is_structured("/projects/list.JSON?v=2"));
    assert!(!m.is_structured("/manifest.json"));
    assert!(!m.is_structured("http://localhost:8080/manifest.json#x"));
    assert!(!m.is_structured("/content/42"));
    assert!(!m.is_structured("/data.json.bak"));
  }
}
