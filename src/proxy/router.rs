//! Network-first request routing with cache fallback.

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::network::Network;
use crate::cache::{CacheStorage, GenerationCache};
use crate::config::{Config, OfflineConfig};
use crate::http::{Request, Response};

/// How an intercepted request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Answered by the network (any status)
  Network,
  /// Network failed, exact cache entry served
  CacheHit,
  /// Network failed, navigation answered with the cached root document
  ShellFallback,
  /// Network failed and nothing usable was cached
  Unavailable,
  /// Not intercepted at all
  Bypassed,
}

impl Outcome {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::CacheHit => "cache",
      Self::ShellFallback => "shell",
      Self::Unavailable => "unavailable",
      Self::Bypassed => "bypassed",
    }
  }
}

/// Result of an intercepted request.
#[derive(Debug)]
pub struct Routed {
  pub response: Response,
  pub outcome: Outcome,
  /// Background cache write, if the response was stored. Nobody has to await it.
  pub write_back: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub enum FetchDecision {
  /// Leave the request on the default network path.
  Bypass,
  Respond(Routed),
}

impl FetchDecision {
  pub fn outcome(&self) -> Outcome {
    match self {
      Self::Bypass => Outcome::Bypassed,
      Self::Respond(routed) => routed.outcome,
    }
  }
}

/// Decides how every request from the page is answered.
///
/// 1. Non-GET and cross-origin requests are bypassed
/// 2. Otherwise the network is tried first; 200 responses are written back
/// 3. On network failure the cache answers, then the shell document for
///    navigations, then a synthesized 503
pub struct Router<S: CacheStorage, N: Network> {
  cache: GenerationCache<S>,
  network: Arc<N>,
  scope: Url,
  root_document: Request,
  offline: OfflineConfig,
}

impl<S: CacheStorage + 'static, N: Network> Router<S, N> {
  pub fn new(config: &Config, cache: GenerationCache<S>, network: Arc<N>) -> Result<Self> {
    Ok(Self {
      cache,
      network,
      scope: config.scope.clone(),
      root_document: Request::get(config.resolve(&config.root_document)?),
      offline: config.offline.clone(),
    })
  }

  /// Whether this request is ours to answer.
  pub fn intercepts(&self, request: &Request) -> bool {
    request.method == Method::GET && request.url.origin() == self.scope.origin()
  }

  /// Route one request. Never fails: every intercepted request gets a response.
  pub async fn handle(&self, request: &Request) -> FetchDecision {
    if !self.intercepts(request) {
      debug!(method = %request.method, url = %request.url, "Bypassing");
      return FetchDecision::Bypass;
    }

    FetchDecision::Respond(self.network_first(request).await)
  }

  async fn network_first(&self, request: &Request) -> Routed {
    match self.network.fetch(request).await {
      Ok(response) => {
        let write_back = if response.is_ok() {
          Some(self.write_back(request, response.clone()))
        } else {
          // Error statuses are surfaced as-is, never cached or masked
          None
        };

        Routed {
          response,
          outcome: Outcome::Network,
          write_back,
        }
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network unavailable, falling back to cache");
        self.fallback(request)
      }
    }
  }

  fn write_back(&self, request: &Request, snapshot: Response) -> JoinHandle<()> {
    let cache = self.cache.clone();
    let request = request.clone();

    tokio::task::spawn_blocking(move || {
      if let Err(e) = cache.put(&request, &snapshot) {
        warn!(url = %request.url, error = %e, "Cache write failed");
      }
    })
  }

  fn fallback(&self, request: &Request) -> Routed {
    if let Some(response) = self.lookup(request) {
      return Routed {
        response,
        outcome: Outcome::CacheHit,
        write_back: None,
      };
    }

    if request.is_navigation() {
      if let Some(response) = self.lookup(&self.root_document) {
        return Routed {
          response,
          outcome: Outcome::ShellFallback,
          write_back: None,
        };
      }
    }

    Routed {
      response: Response::unavailable(&self.offline.reason, &self.offline.body),
      outcome: Outcome::Unavailable,
      write_back: None,
    }
  }

  /// Cache lookup where storage errors count as a miss.
  ///
  /// Runs inline: the caller is waiting on the answer. Only write-backs are
  /// detached onto the blocking pool.
  fn lookup(&self, request: &Request) -> Option<Response> {
    match self.cache.match_request(request) {
      Ok(Some(cached)) => {
        debug!(url = %request.url, cached_at = %cached.cached_at, "Serving from cache");
        Some(cached.response)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache lookup failed");
        None
      }
    }
  }
}
