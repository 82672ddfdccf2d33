//! Versioned cache manager: lifecycle, request routing and offline fallback.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::layer::CacheLayer;
use super::routes::{Route, RouteTable, Strategy};
use super::storage::CacheStorage;
use super::traits::{Network, Request, RequestMode, Response, ResponseSource};
use crate::config::CacheConfig;

/// Meta key holding the generation that completed activation.
const ACTIVE_VERSION_KEY: &str = "active_version";

/// Navigation fallbacks tried in order when offline.
const NAVIGATION_FALLBACKS: &[&str] = &["/", "/dashboard"];

/// Concurrent fetches during install and resync.
const FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Precache not yet complete
  Installing,
  /// Installed, waiting to take over from the previous generation
  Waiting,
  /// Removing other generations
  Activating,
  /// Serving the routing policy
  Active,
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Lifecycle::Installing => "installing",
      Lifecycle::Waiting => "waiting",
      Lifecycle::Activating => "activating",
      Lifecycle::Active => "active",
    })
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
  pub refreshed: usize,
  pub failed: usize,
}

pub struct CacheManager<N: Network, S: CacheStorage> {
  layer: CacheLayer<N, S>,
  routes: RouteTable,
  name_prefix: String,
  version: String,
  static_partition: String,
  dynamic_partition: String,
  precache: Vec<String>,
  state: RwLock<Lifecycle>,
}

impl<N: Network, S: CacheStorage> CacheManager<N, S> {
  /// Build a manager and pick up where a previous run left off.
  pub fn new(network: Arc<N>, storage: Arc<S>, config: &CacheConfig) -> Result<Self> {
    let manager = Self {
      layer: CacheLayer::new(
        network,
        storage,
        Duration::from_secs(config.network_timeout_secs),
      ),
      routes: RouteTable::from_config(config)?,
      name_prefix: config.name_prefix.clone(),
      version: config.version.clone(),
      static_partition: partition_name(&config.name_prefix, "static", &config.version),
      dynamic_partition: partition_name(&config.name_prefix, "dynamic", &config.version),
      precache: config.precache.clone(),
      state: RwLock::new(Lifecycle::Installing),
    };
    manager.resume()?;
    Ok(manager)
  }

  fn storage(&self) -> &S {
    self.layer.storage().as_ref()
  }

  fn resume(&self) -> Result<()> {
    let active = self.storage().get_meta(ACTIVE_VERSION_KEY)?;
    let state = if active.as_deref() == Some(self.version.as_str()) {
      Lifecycle::Active
    } else if self.storage().partitions()?.contains(&self.static_partition) {
      Lifecycle::Waiting
    } else {
      Lifecycle::Installing
    };
    debug!(version = %self.version, %state, "Resumed cache manager");
    self.set_state(state);
    Ok(())
  }

  pub fn state(&self) -> Lifecycle {
    self.state.read().map(|s| *s).unwrap_or(Lifecycle::Installing)
  }

  fn set_state(&self, state: Lifecycle) {
    if let Ok(mut current) = self.state.write() {
      *current = state;
    }
  }

  /// Cache generation identifier.
  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn static_partition(&self) -> &str {
    &self.static_partition
  }

  pub fn dynamic_partition(&self) -> &str {
    &self.dynamic_partition
  }

  /// Number of cached responses in the static and dynamic partitions.
  pub fn entry_counts(&self) -> Result<(usize, usize)> {
    Ok((
      self.storage().urls(&self.static_partition)?.len(),
      self.storage().urls(&self.dynamic_partition)?.len(),
    ))
  }

  /// When a response was last stored in the dynamic partition.
  pub fn last_cached(&self) -> Result<Option<DateTime<Utc>>> {
    let mut newest = None;
    for url in self.storage().urls(&self.dynamic_partition)? {
      if let Some(entry) = self.storage().get(&self.dynamic_partition, &url)? {
        newest = newest.max(Some(entry.cached_at));
      }
    }
    Ok(newest)
  }

  /// Static and dynamic partitions that answer requests right now: this
  /// generation's once active, otherwise those of the generation still
  /// recorded as active. `None` before any generation has been active.
  fn serving_partitions(&self) -> Option<(String, String)> {
    if self.state() == Lifecycle::Active {
      return Some((self.static_partition.clone(), self.dynamic_partition.clone()));
    }
    match self.storage().get_meta(ACTIVE_VERSION_KEY) {
      Ok(active) => active.map(|version| {
        (
          partition_name(&self.name_prefix, "static", &version),
          partition_name(&self.name_prefix, "dynamic", &version),
        )
      }),
      Err(e) => {
        warn!(error = %e, "Failed to read the active cache generation");
        None
      }
    }
  }

  fn absolute(&self, path: &str) -> Result<url::Url> {
    self
      .routes
      .origin()
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Fetch every precache route and store them all in the static partition.
  /// Any failure stores nothing and leaves the manager installing.
  pub async fn install(&self) -> Result<()> {
    self.set_state(Lifecycle::Installing);

    let requests = self
      .precache
      .iter()
      .map(|path| self.absolute(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let responses = stream::iter(requests)
      .map(|request| async move {
        let response = self.layer.fetch(&request).await?;
        if !response.is_ok() {
          return Err(eyre!(
            "Precache of {} returned status {}",
            request.url,
            response.status
          ));
        }
        let mut response = response;
        response.url = request.cache_url();
        Ok(response)
      })
      .buffer_unordered(FETCH_CONCURRENCY)
      .collect::<Vec<Result<Response>>>()
      .await
      .into_iter()
      .collect::<Result<Vec<_>>>()?;

    self.storage().open_partition(&self.static_partition)?;
    self.storage().put_all(&self.static_partition, &responses)?;
    self.set_state(Lifecycle::Waiting);
    info!(version = %self.version, entries = responses.len(), "Cache installed");
    Ok(())
  }

  /// Drop every partition that is not part of this generation and take over.
  pub fn activate(&self) -> Result<()> {
    match self.state() {
      Lifecycle::Installing => return Err(eyre!("Cache {} is not installed yet", self.version)),
      Lifecycle::Active => return Ok(()),
      Lifecycle::Waiting | Lifecycle::Activating => {}
    }

    self.set_state(Lifecycle::Activating);
    for partition in self.storage().partitions()? {
      if partition != self.static_partition && partition != self.dynamic_partition {
        self.storage().delete_partition(&partition)?;
        info!(partition, "Deleted stale cache partition");
      }
    }
    self.storage().open_partition(&self.dynamic_partition)?;
    self.storage().set_meta(ACTIVE_VERSION_KEY, &self.version)?;
    self.set_state(Lifecycle::Active);
    info!(version = %self.version, "Cache activated");
    Ok(())
  }

  /// Activate without waiting for the previous generation to go away.
  pub fn skip_waiting(&self) -> Result<()> {
    info!(version = %self.version, "Skip waiting requested");
    self.activate()
  }

  /// Install if needed, then activate right away unless an older
  /// generation is still in control.
  pub async fn start(&self) -> Result<Lifecycle> {
    if self.state() == Lifecycle::Installing {
      self.install().await?;
    }
    if self.state() == Lifecycle::Waiting && self.storage().get_meta(ACTIVE_VERSION_KEY)?.is_none()
    {
      self.activate()?;
    }
    Ok(self.state())
  }

  /// Route one request. Only passthrough network errors are returned;
  /// everything intercepted ends in a response.
  ///
  /// Until this generation is active, requests are served from the
  /// partitions of the generation that still is.
  pub async fn handle_fetch(&self, request: Request) -> Result<Response> {
    let strategy = match self.routes.route(&request) {
      Route::Passthrough => return self.layer.fetch(&request).await,
      Route::Intercept(strategy) => strategy,
    };

    let Some((static_partition, dynamic_partition)) = self.serving_partitions() else {
      debug!(url = %request.url, state = %self.state(), "No active cache, going to network");
      return Ok(match self.layer.fetch(&request).await {
        Ok(response) => response,
        Err(e) => {
          debug!(url = %request.url, error = %e, "Offline and nothing cached yet");
          Response::offline(request.cache_url())
        }
      });
    };

    let response = match strategy {
      Strategy::NetworkFirst => {
        self
          .layer
          .network_first(&request, &dynamic_partition)
          .await
      }
      Strategy::CacheFirst => self.layer.cache_first(&request, &static_partition).await,
      Strategy::StaleWhileRevalidate => {
        self
          .layer
          .stale_while_revalidate(&request, &dynamic_partition)
          .await
      }
    };

    Ok(match response {
      Some(response) => response,
      None => self.offline_response(&request, &static_partition, &dynamic_partition),
    })
  }

  fn offline_response(
    &self,
    request: &Request,
    static_partition: &str,
    dynamic_partition: &str,
  ) -> Response {
    if request.mode == RequestMode::Navigate {
      for path in NAVIGATION_FALLBACKS {
        let Ok(url) = self.absolute(path) else {
          continue;
        };
        let cached = self.layer.lookup(
          dynamic_partition,
          url.as_str(),
          ResponseSource::DynamicCache,
        );
        if let Some(response) = cached {
          debug!(url = %request.url, fallback = path, "Serving offline navigation fallback");
          return response;
        }
      }
    }

    let url = request.cache_url();
    if let Some(response) = self
      .layer
      .lookup(static_partition, &url, ResponseSource::StaticCache)
    {
      return response;
    }

    debug!(url, "Offline and not cached");
    Response::offline(url)
  }

  /// Re-fetch every cached network-first entry. Individual failures are
  /// logged and counted, never abort the batch.
  pub async fn resync(&self) -> Result<ResyncSummary> {
    let urls: Vec<url::Url> = self
      .storage()
      .urls(&self.dynamic_partition)?
      .into_iter()
      .filter_map(|u| url::Url::parse(&u).ok())
      .filter(|u| self.routes.is_network_first_path(u.path()))
      .collect();

    let results = stream::iter(urls)
      .map(|url| async move {
        let request = Request::get(url);
        let result = match self.layer.fetch(&request).await {
          Ok(response) if response.is_ok() => {
            let mut entry = response;
            entry.url = request.cache_url();
            self.storage().put(&self.dynamic_partition, &entry)
          }
          Ok(response) => Err(eyre!("status {}", response.status)),
          Err(e) => Err(e),
        };
        if let Err(e) = &result {
          warn!(url = %request.url, error = %e, "Failed to refresh cached entry");
        }
        result.is_ok()
      })
      .buffer_unordered(FETCH_CONCURRENCY)
      .collect::<Vec<bool>>()
      .await;

    let refreshed = results.iter().filter(|ok| **ok).count();
    let summary = ResyncSummary {
      refreshed,
      failed: results.len() - refreshed,
    };
    info!(refreshed = summary.refreshed, failed = summary.failed, "Resync finished");
    Ok(summary)
  }

  /// Wait for background revalidations to finish.
  pub async fn settle(&self) {
    self.layer.settle().await;
  }
}

fn partition_name(prefix: &str, kind: &str, version: &str) -> String {
  format!("{}-{}-{}", prefix, kind, version)
}
