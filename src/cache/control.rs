//! In-process control channel for the cache manager.
//!
//! The foreground sends `SKIP_WAITING`, `GET_VERSION` and `RESYNC` messages;
//! a single task owns the receiving end and applies them in order.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::manager::{CacheManager, ResyncSummary};
use super::storage::CacheStorage;
use super::traits::Network;

/// Control messages
#[derive(Debug)]
pub enum ControlMessage {
  /// Activate the waiting generation now
  SkipWaiting,
  /// Reply with the cache generation identifier
  GetVersion { reply: oneshot::Sender<VersionReply> },
  /// Refresh cached API entries. Failures are sent back as text.
  Resync {
    reply: oneshot::Sender<Result<ResyncSummary, String>>,
  },
}

/// Wire form of a control message, e.g. `{"type": "GET_VERSION"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
  SkipWaiting,
  GetVersion,
  Resync,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionReply {
  pub version: String,
}

/// Sending side of the control channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
  tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlHandle {
  fn send(&self, message: ControlMessage) -> Result<()> {
    self
      .tx
      .send(message)
      .map_err(|_| eyre!("Cache control loop has stopped"))
  }

  /// Fire-and-forget.
  pub fn skip_waiting(&self) -> Result<()> {
    self.send(ControlMessage::SkipWaiting)
  }

  pub async fn version(&self) -> Result<VersionReply> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlMessage::GetVersion { reply })?;
    rx.await.map_err(|_| eyre!("Cache control loop dropped the reply"))
  }

  pub async fn resync(&self) -> Result<ResyncSummary> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlMessage::Resync { reply })?;
    rx.await
      .map_err(|_| eyre!("Cache control loop dropped the reply"))?
      .map_err(|e| eyre!("Resync failed: {}", e))
  }

  /// Handle a JSON control message. Returns the JSON reply, if the message has one.
  pub async fn dispatch(&self, json: &str) -> Result<Option<String>> {
    let request: ControlRequest =
      serde_json::from_str(json).map_err(|e| eyre!("Invalid control message: {}", e))?;

    match request {
      ControlRequest::SkipWaiting => {
        self.skip_waiting()?;
        Ok(None)
      }
      ControlRequest::GetVersion => {
        let reply = self.version().await?;
        Ok(Some(serde_json::to_string(&reply)?))
      }
      ControlRequest::Resync => {
        let summary = self.resync().await?;
        Ok(Some(serde_json::to_string(&summary)?))
      }
    }
  }
}

/// Spawn the task that applies control messages to `manager`. The loop ends
/// once every handle is dropped.
pub fn spawn_control_loop<N, S>(manager: Arc<CacheManager<N, S>>) -> (ControlHandle, JoinHandle<()>)
where
  N: Network,
  S: CacheStorage,
{
  let (tx, mut rx) = mpsc::unbounded_channel();

  let task = tokio::spawn(async move {
    while let Some(message) = rx.recv().await {
      debug!(?message, "Control message");
      match message {
        ControlMessage::SkipWaiting => {
          if let Err(e) = manager.skip_waiting() {
            warn!(error = %e, "Skip waiting failed");
          }
        }
        ControlMessage::GetVersion { reply } => {
          let _ = reply.send(VersionReply {
            version: manager.version().to_string(),
          });
        }
        ControlMessage::Resync { reply } => {
          let result = manager.resync().await.map_err(|e| {
            warn!(error = %e, "Resync failed");
            e.to_string()
          });
          let _ = reply.send(result);
        }
      }
    }
  });

  (ControlHandle { tx }, task)
}
