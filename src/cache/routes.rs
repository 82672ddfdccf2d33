//! Routing table: which strategy serves a request.

use reqwest::Method;
use tracing::debug;
use url::Url;

use super::traits::Request;
use crate::config::CacheConfig;

/// A configured path pattern. Entries starting with `.` match a file
/// extension, everything else matches a path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
  Prefix(String),
  Suffix(String),
}

impl PathPattern {
  pub fn parse(pattern: &str) -> Self {
    if pattern.starts_with('.') {
      PathPattern::Suffix(pattern.to_string())
    } else {
      PathPattern::Prefix(pattern.to_string())
    }
  }

  pub fn matches(&self, path: &str) -> bool {
    match self {
      PathPattern::Prefix(p) => path.starts_with(p.as_str()),
      PathPattern::Suffix(s) => path.ends_with(s.as_str()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  NetworkFirst,
  CacheFirst,
  StaleWhileRevalidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted
  Passthrough,
  Intercept(Strategy),
}

#[derive(Debug, Clone)]
pub struct RouteTable {
  origin: Url,
  network_first: Vec<PathPattern>,
  cache_first: Vec<PathPattern>,
}

impl RouteTable {
  pub fn new(origin: Url, network_first: &[String], cache_first: &[String]) -> Self {
    Self {
      origin,
      network_first: network_first.iter().map(|p| PathPattern::parse(p)).collect(),
      cache_first: cache_first.iter().map(|p| PathPattern::parse(p)).collect(),
    }
  }

  pub fn from_config(config: &CacheConfig) -> color_eyre::Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid cache origin '{}': {}", config.origin, e))?;
    Ok(Self::new(origin, &config.network_first, &config.cache_first))
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Network-first patterns win over cache-first ones.
  pub fn route(&self, request: &Request) -> Route {
    if request.method != Method::GET || request.url.origin() != self.origin.origin() {
      debug!(method = %request.method, url = %request.url, "Passing through");
      return Route::Passthrough;
    }

    let path = request.url.path();
    let strategy = if self.is_network_first_path(path) {
      Strategy::NetworkFirst
    } else if self.cache_first.iter().any(|p| p.matches(path)) {
      Strategy::CacheFirst
    } else {
      Strategy::StaleWhileRevalidate
    };

    debug!(url = %request.url, ?strategy, "Routing request");
    Route::Intercept(strategy)
  }

  pub fn is_network_first_path(&self, path: &str) -> bool {
    self.network_first.iter().any(|p| p.matches(path))
  }
}
