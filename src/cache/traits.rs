//! Core traits and types for the offline cache.

use color_eyre::Result;
use reqwest::Method;
use std::future::Future;
use url::Url;

/// How a request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  /// Script, style, image, font, API call
  Subresource,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
    }
  }

  /// Key used for cache lookups. Fragments never reach the server, so they are dropped.
  pub fn cache_url(&self) -> String {
    cache_url(&self.url)
  }
}

pub fn cache_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// A response as stored in and served from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status,
      headers: Vec::new(),
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  /// Degraded response when nothing could be served.
  pub fn offline(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      status: 503,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: OFFLINE_BODY.as_bytes().to_vec(),
      source: ResponseSource::Offline,
    }
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub(crate) fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }
}

pub const OFFLINE_BODY: &str =
  r#"{"error":"offline","message":"You are offline and this resource is not cached."}"#;

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from the static partition
  StaticCache,
  /// Served from the dynamic partition
  DynamicCache,
  /// Synthesized because neither network nor cache could answer
  Offline,
}

/// Network access used by the cache.
pub trait Network: Send + Sync + 'static {
  /// Perform the request. `Err` means the request never produced a response
  /// (connection refused, DNS, timeout); HTTP error statuses are `Ok`.
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}
