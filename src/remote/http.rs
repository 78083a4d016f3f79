use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Mutation, RemoteSource};
use crate::cache::Query;
use crate::config::Config;
use crate::error::FetchError;

/// Longest server message kept in a `Status` error.
const MAX_ERROR_BODY: usize = 200;

/// Dashboard API client over HTTP
#[derive(Clone)]
pub struct HttpSource {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpSource {
  pub fn new(config: &Config) -> Result<Self> {
    let token = match config.get_api_token() {
      Ok(token) => Some(token),
      Err(e) => {
        debug!("Continuing without API token: {}", e);
        None
      }
    };

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base: base_url(&config.api.url)?,
      token,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| FetchError::Transport(format!("invalid path {}: {}", path, e)))
  }

  async fn send(&self, request: RequestBuilder) -> Result<Value, FetchError> {
    let request = match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    };

    let response = request
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return Err(FetchError::Unauthorized);
    }

    let body = response
      .text()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    if !status.is_success() {
      return Err(FetchError::Status {
        status: status.as_u16(),
        message: truncate(&body),
      });
    }

    // Status-only responses
    if body.trim().is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(FetchError::from)
  }
}

impl RemoteSource for HttpSource {
  fn fetch<'a>(&'a self, resource: &'a str, query: &'a Query) -> BoxFuture<'a, Result<Value, FetchError>> {
    async move {
      let url = self.endpoint(resource)?;
      debug!(%url, "GET");
      let request = self.client.get(url).query(query.pairs());
      self.send(request).await
    }
    .boxed()
  }

  fn mutate<'a>(
    &'a self,
    method: Mutation,
    path: &'a str,
    body: Option<Value>,
  ) -> BoxFuture<'a, Result<Value, FetchError>> {
    async move {
      let url = self.endpoint(path)?;
      let method = match method {
        Mutation::Post => Method::POST,
        Mutation::Put => Method::PUT,
        Mutation::Patch => Method::PATCH,
        Mutation::Delete => Method::DELETE,
      };
      debug!(%url, %method, "Mutation");

      let mut request = self.client.request(method, url);
      if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).map_err(FetchError::from)?;
        request = request.header(CONTENT_TYPE, "application/json").body(bytes);
      }
      self.send(request).await
    }
    .boxed()
  }
}

/// Parse the configured base URL, forcing a trailing slash so relative
/// resource paths join underneath it.
fn base_url(raw: &str) -> Result<Url> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid API url {}: {}", raw, e))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

fn truncate(body: &str) -> String {
  let body = body.trim();
  match body.char_indices().nth(MAX_ERROR_BODY) {
    Some((idx, _)) => format!("{}...", &body[..idx]),
    None => body.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_base_url_keeps_path_prefix() {
    let base = base_url("https://ops.example.com/api").unwrap();
    assert_eq!(
      base.join("machines").unwrap().as_str(),
      "https://ops.example.com/api/machines"
    );

    let base = base_url("https://ops.example.com/api/").unwrap();
    assert_eq!(
      base.join("notifications/unread-count").unwrap().as_str(),
      "https://ops.example.com/api/notifications/unread-count"
    );
  }

  #[test]
  fn test_base_url_rejects_garbage() {
    assert!(base_url("not a url").is_err());
  }

  #[test]
  fn test_truncate_long_bodies() {
    let long = "x".repeat(MAX_ERROR_BODY + 50);
    let short = truncate(&long);
    assert!(short.ends_with("..."));
    assert_eq!(short.len(), MAX_ERROR_BODY + 3);
    assert_eq!(truncate("  short  "), "short");
  }
}
