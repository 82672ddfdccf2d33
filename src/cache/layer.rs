//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{Network, Request, Response, ResponseSource};

/// Cache layer that applies one strategy to one request.
///
/// Each strategy returns `Ok(None)` when neither the network nor the cache
/// could answer, leaving the fallback decision to the caller. Storage errors
/// are logged and treated as a cache miss.
pub struct CacheLayer<N: Network, S: CacheStorage> {
  network: Arc<N>,
  storage: Arc<S>,
  /// Upper bound for a single network attempt
  timeout: Duration,
  /// Background revalidations; finished ones are reaped on the next spawn
  background: Mutex<JoinSet<()>>,
}

impl<N: Network, S: CacheStorage> CacheLayer<N, S> {
  pub fn new(network: Arc<N>, storage: Arc<S>, timeout: Duration) -> Self {
    Self {
      network,
      storage,
      timeout,
      background: Mutex::new(JoinSet::new()),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Fetch from the network with the layer's timeout. A timeout is an error.
  pub async fn fetch(&self, request: &Request) -> Result<Response> {
    fetch_with_timeout(self.network.as_ref(), request, self.timeout).await
  }

  /// Look up a cached copy, tagging it with where it came from.
  pub fn lookup(&self, partition: &str, url: &str, source: ResponseSource) -> Option<Response> {
    match self.storage.get(partition, url) {
      Ok(entry) => entry.map(|e| e.response.with_source(source)),
      Err(e) => {
        warn!(partition, url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  /// Try the network; store successful responses. On network failure serve
  /// the last cached copy.
  pub async fn network_first(&self, request: &Request, partition: &str) -> Option<Response> {
    let url = request.cache_url();
    match self.fetch(request).await {
      Ok(response) => {
        store(self.storage.as_ref(), partition, &url, &response);
        Some(response)
      }
      Err(e) => {
        debug!(url, error = %e, "Network failed, trying cache");
        self.lookup(partition, &url, ResponseSource::DynamicCache)
      }
    }
  }

  /// Serve the cached copy if present, otherwise fetch and store.
  pub async fn cache_first(&self, request: &Request, partition: &str) -> Option<Response> {
    let url = request.cache_url();
    if let Some(cached) = self.lookup(partition, &url, ResponseSource::StaticCache) {
      return Some(cached);
    }

    match self.fetch(request).await {
      Ok(response) => {
        store(self.storage.as_ref(), partition, &url, &response);
        Some(response)
      }
      Err(e) => {
        debug!(url, error = %e, "Network failed, nothing cached");
        None
      }
    }
  }

  /// Serve the cached copy immediately and refresh it in the background.
  /// Without a cached copy, wait for the network.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    partition: &str,
  ) -> Option<Response> {
    let url = request.cache_url();
    if let Some(cached) = self.lookup(partition, &url, ResponseSource::DynamicCache) {
      self.revalidate(request.clone(), partition.to_string());
      return Some(cached);
    }

    match self.fetch(request).await {
      Ok(response) => {
        store(self.storage.as_ref(), partition, &url, &response);
        Some(response)
      }
      Err(e) => {
        debug!(url, error = %e, "Network failed, nothing cached");
        None
      }
    }
  }

  fn revalidate(&self, request: Request, partition: String) {
    let network = Arc::clone(&self.network);
    let storage = Arc::clone(&self.storage);
    let timeout = self.timeout;

    let task = async move {
      let url = request.cache_url();
      match fetch_with_timeout(network.as_ref(), &request, timeout).await {
        Ok(response) => store(storage.as_ref(), &partition, &url, &response),
        Err(e) => debug!(url, error = %e, "Background revalidation failed"),
      }
    };

    match self.background.lock() {
      Ok(mut tasks) => {
        reap(&mut tasks);
        tasks.spawn(task);
      }
      Err(e) => warn!(error = %e, "Background task set poisoned, skipping revalidation"),
    }
  }

  #[cfg(test)]
  fn pending_revalidations(&self) -> usize {
    self.background.lock().map(|tasks| tasks.len()).unwrap_or(0)
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    let mut tasks = match self.background.lock() {
      Ok(mut tasks) => std::mem::take(&mut *tasks),
      Err(_) => return,
    };
    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Background revalidation panicked");
      }
    }
  }
}

/// Dropping the layer aborts revalidations that have not finished; call
/// `settle()` first to keep them.
impl<N: Network, S: CacheStorage> Drop for CacheLayer<N, S> {
  fn drop(&mut self) {
    if let Ok(tasks) = self.background.get_mut() {
      reap(tasks);
      if !tasks.is_empty() {
        warn!(pending = tasks.len(), "Aborting unfinished background revalidations");
      }
    }
  }
}

/// Remove finished tasks from the set without waiting.
fn reap(tasks: &mut JoinSet<()>) {
  while let Some(result) = tasks.try_join_next() {
    if let Err(e) = result {
      warn!(error = %e, "Background revalidation panicked");
    }
  }
}

pub(crate) async fn fetch_with_timeout<N: Network>(
  network: &N,
  request: &Request,
  timeout: Duration,
) -> Result<Response> {
  match tokio::time::timeout(timeout, network.fetch(request)).await {
    Ok(result) => result,
    Err(_) => Err(eyre!(
      "Request to {} timed out after {:?}",
      request.url,
      timeout
    )),
  }
}

/// Store a response under `url` if it is a success. Failures are logged.
fn store<S: CacheStorage>(storage: &S, partition: &str, url: &str, response: &Response) {
  if !response.is_ok() {
    debug!(url, status = response.status, "Not caching unsuccessful response");
    return;
  }

  let mut entry = response.clone();
  entry.url = url.to_string();
  entry.source = ResponseSource::Network;
  if let Err(e) = storage.put(partition, &entry) {
    warn!(partition, url, error = %e, "Failed to cache response");
  }
}
