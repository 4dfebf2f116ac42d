//! Backend content server endpoints and payload types.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::cache::VersionToken;
use crate::net::{FetchError, FetchRequest, Fetcher};

/// Response of `GET {backend}/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
  pub version: VersionToken,
}

/// Entry of `GET {backend}/projects`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSummary {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub version: Option<VersionToken>,
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  VersionToken::from_value(&value)
    .map(|token| token.as_str().to_string())
    .ok_or_else(|| serde::de::Error::custom(format!("invalid project id: {}", value)))
}

/// Endpoint builder for the backend origin.
#[derive(Debug, Clone)]
pub struct BackendApi {
  base: String,
}

impl BackendApi {
  pub fn new(base: &str) -> Self {
    Self {
      base: base.trim_end_matches('/').to_string(),
    }
  }

  pub fn version_url(&self) -> String {
    format!("{}/version", self.base)
  }

  pub fn projects_url(&self) -> String {
    format!("{}/projects", self.base)
  }

  pub fn content_url(&self, project_id: &str) -> String {
    format!("{}/content/{}", self.base, project_id)
  }

  /// Poll the global version token, bypassing every cache.
  pub async fn fetch_version<F: Fetcher>(&self, fetcher: &F) -> Result<VersionToken, FetchError> {
    let response: VersionResponse = self
      .get_json(fetcher, FetchRequest::new(self.version_url()).no_store())
      .await?;
    Ok(response.version)
  }

  /// List the published projects.
  pub async fn fetch_projects<F: Fetcher>(
    &self,
    fetcher: &F,
  ) -> Result<Vec<ProjectSummary>, FetchError> {
    self
      .get_json(fetcher, FetchRequest::new(self.projects_url()).no_store())
      .await
  }

  async fn get_json<F, T>(&self, fetcher: &F, request: FetchRequest) -> Result<T, FetchError>
  where
    F: Fetcher,
    T: serde::de::DeserializeOwned,
  {
    let response = fetcher.fetch(&request).await?;
    if !response.is_ok() {
      return Err(FetchError::Status {
        url: request.url,
        status: response.status,
      });
    }

    serde_json::from_slice(&response.body).map_err(|e| FetchError::Decode {
      url: request.url,
      message: e.to_string(),
    })
  }
}
