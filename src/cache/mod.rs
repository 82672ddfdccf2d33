//! Offline cache for the application's web resources.
//!
//! This module provides a versioned, partitioned response cache that:
//! - Precaches known routes into a static partition on install
//! - Garbage-collects partitions from older generations on activation
//! - Routes each same-origin GET through network-first, cache-first or
//!   stale-while-revalidate
//! - Serves a cached page or a synthesized offline response when the network is gone

mod control;
mod http;
mod layer;
mod manager;
mod routes;
mod storage;
mod traits;

pub use control::spawn_control_loop;
pub use http::HttpNetwork;
pub use manager::CacheManager;
pub use storage::SqliteStorage;
pub use traits::Request;

/// File name of the cache database inside the data directory.
pub const CACHE_FILE: &str = "cache.db";

#[cfg(test)]
pub(crate) mod tests {
  use color_eyre::{eyre::eyre, Result};
  use std::collections::HashMap;
  use std::sync::Mutex;
  use std::time::Duration;

  use super::traits::{Network, Request, Response};

  #[derive(Clone)]
  enum Reply {
    Ok {
      status: u16,
      body: String,
      delay: Option<Duration>,
    },
    Fail,
  }

  /// Scripted network keyed by URL (without fragment). Unscripted URLs fail.
  #[derive(Default)]
  pub(crate) struct FakeNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
  }

  impl FakeNetwork {
    pub(crate) fn new() -> Self {
      Self::default()
    }

    fn script(&self, url: &str, reply: Reply) {
      self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    pub(crate) fn reply(&self, url: &str, status: u16, body: &str) {
      self.script(
        url,
        Reply::Ok {
          status,
          body: body.to_string(),
          delay: None,
        },
      );
    }

    pub(crate) fn reply_after(&self, url: &str, status: u16, body: &str, delay: Duration) {
      self.script(
        url,
        Reply::Ok {
          status,
          body: body.to_string(),
          delay: Some(delay),
        },
      );
    }

    pub(crate) fn fail(&self, url: &str) {
      self.script(url, Reply::Fail);
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
      self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
  }

  impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      let url = request.cache_url();
      *self.calls.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
      let reply = self.replies.lock().unwrap().get(&url).cloned();

      match reply {
        Some(Reply::Ok {
          status,
          body,
          delay,
        }) => {
          if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
          }
          Ok(Response::new(url, status, body.into_bytes()))
        }
        Some(Reply::Fail) | None => Err(eyre!("connection refused: {}", url)),
      }
    }
  }
}
