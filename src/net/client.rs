use color_eyre::{eyre::eyre, Result};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::time::Duration;
use tracing::trace;
use url::Url;

use super::{data_url, FetchError, FetchMode, FetchRequest, Fetcher};
use crate::cache::RawResponse;

const USER_AGENT: &str = concat!("kiosk-cache/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct ReqwestFetcher {
  client: reqwest::Client,
  /// Reduced-fidelity client: no user agent, no referrer
  anonymous: reqwest::Client,
}

impl ReqwestFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let anonymous = reqwest::Client::builder()
      .timeout(timeout)
      .referer(false)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, anonymous })
  }
}

impl Fetcher for ReqwestFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
    let url = Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
      url: request.url.clone(),
      message: e.to_string(),
    })?;

    match url.scheme() {
      "data" => return data_url::decode(&request.url),
      "http" | "https" => {}
      _ => return Err(FetchError::UnsupportedScheme(request.url.clone())),
    }

    let client = match request.mode {
      FetchMode::Standard => &self.client,
      FetchMode::ReducedFidelity => &self.anonymous,
    };

    let mut builder = client.get(url);
    if request.bypass_cache {
      builder = builder
        .header(CACHE_CONTROL, "no-store")
        .header(PRAGMA, "no-cache");
    }

    let response = builder.send().await.map_err(|e| FetchError::Transport {
      url: request.url.clone(),
      message: e.to_string(),
    })?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Body {
        url: request.url.clone(),
        message: e.to_string(),
      })?
      .to_vec();

    trace!(url = %request.url, status, bytes = body.len(), "fetched");

    Ok(RawResponse {
      status,
      headers,
      body,
      opaque: request.mode == FetchMode::ReducedFidelity,
    })
  }
}
