//! Entry point for host events.

use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::host::Host;
use super::lifecycle::{Lifecycle, WorkerState};
use super::network::Network;
use super::notify::NotificationBridge;
use super::router::{FetchDecision, Outcome, Router};
use crate::cache::{CacheStorage, GenerationCache};
use crate::config::Config;
use crate::event::HostEvent;
use crate::http::{Request, Response};

/// Result of routing one request through the worker.
#[derive(Debug)]
pub struct Fetched {
  pub outcome: Outcome,
  /// `None` when bypassed: the host performs the request itself
  pub response: Option<Response>,
}

/// What handling a host event produced.
#[derive(Debug)]
pub enum Dispatched {
  Lifecycle(WorkerState),
  Fetch(Fetched),
  Notified,
  Sync { recognized: bool },
}

/// One process image of the proxy: lifecycle, router and notification bridge
/// sharing a single cache generation.
pub struct ProxyWorker<S: CacheStorage, N: Network, H: Host> {
  lifecycle: Lifecycle<S, N, H>,
  router: Router<S, N>,
  bridge: NotificationBridge<H>,
  /// Outstanding cache write-backs
  pending: Vec<JoinHandle<()>>,
}

impl<S: CacheStorage + 'static, N: Network, H: Host> ProxyWorker<S, N, H> {
  pub fn new(config: &Config, storage: Arc<S>, network: Arc<N>, host: Arc<H>) -> Result<Self> {
    let cache = GenerationCache::new(storage, config.generation.clone());
    let lifecycle = Lifecycle::restore(
      cache.clone(),
      network.clone(),
      host.clone(),
      config.seed_urls()?,
    )?;
    let router = Router::new(config, cache, network)?;
    let bridge = NotificationBridge::new(config, host)?;

    Ok(Self {
      lifecycle,
      router,
      bridge,
      pending: Vec::new(),
    })
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn generation(&self) -> &str {
    self.lifecycle.generation()
  }

  /// Install and activate as needed.
  pub async fn start(&mut self) -> Result<WorkerState> {
    self.lifecycle.start().await?;
    Ok(self.state())
  }

  /// Route a request from the page.
  pub async fn fetch(&mut self, request: &Request) -> Fetched {
    if self.state() != WorkerState::Active {
      debug!(state = %self.state(), url = %request.url, "Not controlling clients yet");
      return Fetched {
        outcome: Outcome::Bypassed,
        response: None,
      };
    }

    let decision = self.router.handle(request).await;
    debug!(url = %request.url, outcome = decision.outcome().as_str(), "Routed");

    match decision {
      FetchDecision::Bypass => Fetched {
        outcome: Outcome::Bypassed,
        response: None,
      },
      FetchDecision::Respond(routed) => {
        if let Some(handle) = routed.write_back {
          self.pending.retain(|h| !h.is_finished());
          self.pending.push(handle);
        }

        Fetched {
          outcome: routed.outcome,
          response: Some(routed.response),
        }
      }
    }
  }

  pub async fn dispatch(&mut self, event: HostEvent) -> Result<Dispatched> {
    match event {
      HostEvent::Install => {
        self.lifecycle.install().await?;
        Ok(Dispatched::Lifecycle(self.state()))
      }
      HostEvent::Activate => {
        self.lifecycle.activate().await?;
        Ok(Dispatched::Lifecycle(self.state()))
      }
      HostEvent::Fetch(request) => Ok(Dispatched::Fetch(self.fetch(&request).await)),
      HostEvent::Push(payload) => {
        self.bridge.on_push(payload.as_deref()).await?;
        Ok(Dispatched::Notified)
      }
      HostEvent::NotificationClick(tag) => {
        self.bridge.on_notification_click(tag.as_deref()).await?;
        Ok(Dispatched::Notified)
      }
      HostEvent::Sync(tag) => Ok(Dispatched::Sync {
        recognized: self.bridge.on_sync(&tag),
      }),
    }
  }

  /// Wait for outstanding cache writes before the process goes away.
  pub async fn drain(&mut self) {
    for handle in self.pending.drain(..) {
      if let Err(e) = handle.await {
        warn!(error = %e, "Cache write task failed");
      }
    }
  }
}
