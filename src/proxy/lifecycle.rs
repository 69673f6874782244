//! Install and activate phases of the proxy.
//!
//! Install seeds a fresh cache generation; activate deletes every other
//! generation and takes control of open clients.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::host::Host;
use super::network::Network;
use crate::cache::{CacheStorage, GenerationCache, GenerationState};
use crate::http::{Request, Response};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Uninstalled,
  Installing,
  /// Seed set committed, waiting to activate
  Installed,
  Activating,
  /// Intercepting requests
  Active,
  /// Seeding failed; only a fresh install attempt leaves this state
  InstallFailed,
}

impl WorkerState {
  /// State of a process image whose generation was left in `stored` by an earlier run.
  fn restored(stored: Option<GenerationState>) -> Self {
    match stored {
      None => Self::Uninstalled,
      // Never finished seeding
      Some(GenerationState::Installing) => Self::InstallFailed,
      Some(GenerationState::Installed) => Self::Installed,
      Some(GenerationState::Active) => Self::Active,
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Uninstalled => "uninstalled",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::InstallFailed => "install-failed",
    };
    f.write_str(s)
  }
}

fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
  use WorkerState::*;

  matches!(
    (from, to),
    (Uninstalled | InstallFailed, Installing)
      | (Installing, Installed | InstallFailed)
      | (Installed, Activating)
      | (Activating, Active | Installed)
  )
}

/// Fetch one seed file. Anything but a 200 counts as a failure.
async fn fetch_seed<N: Network>(network: &N, url: &Url) -> Result<(Request, Response)> {
  let request = Request::get(url.clone());
  let response = network
    .fetch(&request)
    .await
    .map_err(|e| eyre!("Failed to fetch seed file {}: {}", url, e))?;

  if !response.is_ok() {
    return Err(eyre!(
      "Seed file {} returned {} {}",
      url,
      response.status,
      response.reason
    ));
  }

  Ok((request, response))
}

/// Owns the generation lifecycle. The only component allowed to create or
/// delete whole generations.
pub struct Lifecycle<S: CacheStorage, N: Network, H: Host> {
  cache: GenerationCache<S>,
  network: Arc<N>,
  host: Arc<H>,
  seed_urls: Vec<Url>,
  state: WorkerState,
}

impl<S: CacheStorage, N: Network, H: Host> Lifecycle<S, N, H> {
  pub fn new(
    cache: GenerationCache<S>,
    network: Arc<N>,
    host: Arc<H>,
    seed_urls: Vec<Url>,
  ) -> Self {
    Self {
      cache,
      network,
      host,
      seed_urls,
      state: WorkerState::Uninstalled,
    }
  }

  /// Pick up where a previous run of the same generation left off.
  pub fn restore(
    cache: GenerationCache<S>,
    network: Arc<N>,
    host: Arc<H>,
    seed_urls: Vec<Url>,
  ) -> Result<Self> {
    let stored = cache.state()?;
    let mut lifecycle = Self::new(cache, network, host, seed_urls);
    lifecycle.state = WorkerState::restored(stored);

    Ok(lifecycle)
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn generation(&self) -> &str {
    self.cache.generation()
  }

  fn transition(&mut self, to: WorkerState) -> Result<()> {
    if !is_valid_transition(self.state, to) {
      return Err(eyre!(
        "Cannot move {} from {} to {}",
        self.cache.generation(),
        self.state,
        to
      ));
    }
    self.state = to;
    Ok(())
  }

  /// Seed the cache. All-or-nothing: one failed seed fails the whole install.
  pub async fn install(&mut self) -> Result<()> {
    self.transition(WorkerState::Installing)?;
    info!(generation = self.generation(), "Installing");

    if let Err(e) = self.precache().await {
      warn!(generation = self.generation(), error = %e, "Install failed");
      self.transition(WorkerState::InstallFailed)?;
      return Err(e);
    }

    self.transition(WorkerState::Installed)?;
    info!(generation = self.generation(), "Installed");

    self.host.skip_waiting().await
  }

  async fn precache(&self) -> Result<()> {
    self.cache.open()?;
    info!(count = self.seed_urls.len(), "Caching files");

    let fetches = self
      .seed_urls
      .iter()
      .map(|url| fetch_seed(self.network.as_ref(), url));

    // Nothing is written until every seed has arrived. The commit is awaited
    // inline since install cannot finish before it.
    let entries = try_join_all(fetches).await?;
    self.cache.commit_seeds(&entries)
  }

  /// Delete every other generation and start controlling clients.
  ///
  /// A failed cleanup drops back to `Installed`, so activation can be retried.
  pub async fn activate(&mut self) -> Result<()> {
    self.transition(WorkerState::Activating)?;
    info!(generation = self.generation(), "Activating");

    if let Err(e) = self.take_over() {
      warn!(generation = self.generation(), error = %e, "Activation failed");
      self.transition(WorkerState::Installed)?;
      return Err(e);
    }

    self.transition(WorkerState::Active)?;
    info!(generation = self.generation(), "Activated");

    self.host.claim_clients().await
  }

  fn take_over(&self) -> Result<()> {
    let storage = self.cache.storage();
    let stale: Vec<String> = storage
      .list()?
      .into_iter()
      .filter(|name| name != self.cache.generation())
      .collect();

    for name in stale {
      info!(cache = %name, "Deleting old cache");
      storage.delete(&name)?;
    }

    self.cache.mark_active()
  }

  /// Drive the lifecycle forward until the worker is active.
  pub async fn start(&mut self) -> Result<()> {
    if matches!(
      self.state,
      WorkerState::Uninstalled | WorkerState::InstallFailed
    ) {
      self.install().await?;
    }

    if self.state == WorkerState::Installed {
      self.activate().await?;
    }

    if self.state != WorkerState::Active {
      return Err(eyre!(
        "Cache {} stopped in state {}",
        self.generation(),
        self.state
      ));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::{CachedResponse, GenerationInfo};
  use crate::cache::SqliteStorage;
  use crate::config::Config;
  use crate::http::RequestIdentity;
  use crate::proxy::testing::{HostCall, RecordingHost, StubNetwork};
  use std::sync::atomic::{AtomicBool, Ordering};

  const SCOPE: &str = "https://app.example/";

  /// SQLite storage whose next generation delete fails once.
  struct FlakyStorage {
    inner: SqliteStorage,
    fail_delete: AtomicBool,
  }

  impl FlakyStorage {
    fn new() -> Self {
      Self {
        inner: SqliteStorage::in_memory().unwrap(),
        fail_delete: AtomicBool::new(true),
      }
    }
  }

  impl CacheStorage for FlakyStorage {
    fn open(&self, generation: &str) -> Result<()> {
      self.inner.open(generation)
    }

    fn get(
      &self,
      generation: &str,
      identity: &RequestIdentity,
    ) -> Result<Option<CachedResponse>> {
      self.inner.get(generation, identity)
    }

    fn put(&self, generation: &str, identity: &RequestIdentity, response: &Response) -> Result<()> {
      self.inner.put(generation, identity, response)
    }

    fn commit_seeds(&self, generation: &str, entries: &[(RequestIdentity, Response)]) -> Result<()> {
      self.inner.commit_seeds(generation, entries)
    }

    fn delete(&self, generation: &str) -> Result<bool> {
      if self.fail_delete.swap(false, Ordering::SeqCst) {
        return Err(eyre!("disk busy"));
      }
      self.inner.delete(generation)
    }

    fn list(&self) -> Result<Vec<String>> {
      self.inner.list()
    }

    fn generation_state(&self, generation: &str) -> Result<Option<GenerationState>> {
      self.inner.generation_state(generation)
    }

    fn set_generation_state(&self, generation: &str, state: GenerationState) -> Result<()> {
      self.inner.set_generation_state(generation, state)
    }

    fn describe(&self) -> Result<Vec<GenerationInfo>> {
      self.inner.describe()
    }
  }

  struct Fixture {
    storage: Arc<SqliteStorage>,
    network: Arc<StubNetwork>,
    host: Arc<RecordingHost>,
    seeds: Vec<Url>,
  }

  impl Fixture {
    fn new() -> Self {
      let config = Config::for_scope(Url::parse(SCOPE).unwrap());
      Self {
        storage: Arc::new(SqliteStorage::in_memory().unwrap()),
        network: Arc::new(StubNetwork::default()),
        host: Arc::new(RecordingHost::default()),
        seeds: config.seed_urls().unwrap(),
      }
    }

    fn serve_seeds(&self) {
      for url in &self.seeds {
        self.network.respond(url.as_str(), Response::new(200, "seed"));
      }
    }

    fn lifecycle(&self, generation: &str) -> Lifecycle<SqliteStorage, StubNetwork, RecordingHost> {
      Lifecycle::new(
        GenerationCache::new(self.storage.clone(), generation),
        self.network.clone(),
        self.host.clone(),
        self.seeds.clone(),
      )
    }

    fn restore(&self, generation: &str) -> Lifecycle<SqliteStorage, StubNetwork, RecordingHost> {
      Lifecycle::restore(
        GenerationCache::new(self.storage.clone(), generation),
        self.network.clone(),
        self.host.clone(),
        self.seeds.clone(),
      )
      .unwrap()
    }
  }

  #[test]
  fn test_valid_transitions() {
    use WorkerState::*;

    assert!(is_valid_transition(Uninstalled, Installing));
    assert!(is_valid_transition(InstallFailed, Installing));
    assert!(is_valid_transition(Installing, InstallFailed));
    assert!(is_valid_transition(Installed, Activating));
    assert!(!is_valid_transition(Uninstalled, Activating));
    assert!(!is_valid_transition(Active, Installing));
    assert!(!is_valid_transition(InstallFailed, Activating));
    assert!(is_valid_transition(Activating, Installed));
    assert!(!is_valid_transition(Activating, Activating));
  }

  #[tokio::test]
  async fn test_install_seeds_cache() {
    let f = Fixture::new();
    f.serve_seeds();

    let mut lifecycle = f.lifecycle("v7");
    lifecycle.install().await.unwrap();

    assert_eq!(lifecycle.state(), WorkerState::Installed);
    assert_eq!(f.storage.generation_state("v7").unwrap(), Some(GenerationState::Installed));
    assert_eq!(f.storage.describe().unwrap()[0].entries, 3);
    assert_eq!(f.host.calls(), vec![HostCall::SkipWaiting]);
  }

  #[tokio::test]
  async fn test_failed_seed_fails_install() {
    let f = Fixture::new();
    f.serve_seeds();
    f.network.fail("https://app.example/manifest.json");

    let mut lifecycle = f.lifecycle("v7");
    let err = lifecycle.install().await.unwrap_err();

    assert!(err.to_string().contains("manifest.json"));
    assert_eq!(lifecycle.state(), WorkerState::InstallFailed);
    assert_ne!(f.storage.generation_state("v7").unwrap(), Some(GenerationState::Installed));
    assert!(f.host.calls().is_empty());
  }

  #[tokio::test]
  async fn test_error_status_seed_fails_install() {
    let f = Fixture::new();
    f.serve_seeds();
    f.network.respond("https://app.example/index.html", Response::new(404, ""));

    let mut lifecycle = f.lifecycle("v7");
    assert!(lifecycle.install().await.is_err());
    assert_eq!(lifecycle.state(), WorkerState::InstallFailed);
    assert_eq!(f.storage.describe().unwrap()[0].entries, 0);
  }

  #[tokio::test]
  async fn test_install_can_be_retried() {
    let f = Fixture::new();
    let mut lifecycle = f.lifecycle("v7");
    assert!(lifecycle.install().await.is_err());

    f.serve_seeds();
    lifecycle.install().await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Installed);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let f = Fixture::new();
    let mut lifecycle = f.lifecycle("v7");

    assert!(lifecycle.activate().await.is_err());
    assert_eq!(lifecycle.state(), WorkerState::Uninstalled);
  }

  #[tokio::test]
  async fn test_activate_deletes_old_generations() {
    let f = Fixture::new();
    f.storage.open("v6").unwrap();
    for i in 0..10 {
      let url = Url::parse(SCOPE).unwrap().join(&format!("asset-{}.js", i)).unwrap();
      GenerationCache::new(f.storage.clone(), "v6")
        .put(&Request::get(url), &Response::new(200, "old"))
        .unwrap();
    }
    f.serve_seeds();

    let mut lifecycle = f.lifecycle("v7");
    lifecycle.install().await.unwrap();
    lifecycle.activate().await.unwrap();

    assert_eq!(lifecycle.state(), WorkerState::Active);
    assert_eq!(f.storage.list().unwrap(), vec!["v7".to_string()]);
    assert_eq!(f.storage.describe().unwrap()[0].entries, 3);
    assert_eq!(f.storage.generation_state("v7").unwrap(), Some(GenerationState::Active));
    assert_eq!(
      f.host.calls(),
      vec![HostCall::SkipWaiting, HostCall::ClaimClients]
    );
  }

  #[tokio::test]
  async fn test_start_runs_to_active() {
    let f = Fixture::new();
    f.serve_seeds();

    let mut lifecycle = f.lifecycle("v7");
    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Active);

    // Already active: nothing to do, nothing fetched
    let calls = f.network.call_count();
    let mut again = f.restore("v7");
    assert_eq!(again.state(), WorkerState::Active);
    again.start().await.unwrap();
    assert_eq!(f.network.call_count(), calls);
  }

  #[tokio::test]
  async fn test_restore_maps_stored_state() {
    let f = Fixture::new();
    assert_eq!(f.restore("v7").state(), WorkerState::Uninstalled);

    f.storage.open("v7").unwrap();
    assert_eq!(f.restore("v7").state(), WorkerState::InstallFailed);

    f.storage.set_generation_state("v7", GenerationState::Installed).unwrap();
    let mut installed = f.restore("v7");
    assert_eq!(installed.state(), WorkerState::Installed);

    // Installed but never activated: start only activates
    installed.start().await.unwrap();
    assert_eq!(installed.state(), WorkerState::Active);
    assert_eq!(f.network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_failed_activate_can_be_retried() {
    let storage = Arc::new(FlakyStorage::new());
    let network = Arc::new(StubNetwork::default());
    let host = Arc::new(RecordingHost::default());
    let seeds = Config::for_scope(Url::parse(SCOPE).unwrap()).seed_urls().unwrap();
    for url in &seeds {
      network.respond(url.as_str(), Response::new(200, "seed"));
    }
    storage.open("v6").unwrap();

    let mut lifecycle = Lifecycle::new(
      GenerationCache::new(storage.clone(), "v7"),
      network,
      host.clone(),
      seeds,
    );
    lifecycle.install().await.unwrap();

    let err = lifecycle.activate().await.unwrap_err();
    assert!(err.to_string().contains("disk busy"));
    assert_eq!(lifecycle.state(), WorkerState::Installed);
    assert_eq!(storage.generation_state("v7").unwrap(), Some(GenerationState::Installed));
    assert_eq!(host.calls(), vec![HostCall::SkipWaiting]);

    lifecycle.activate().await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Active);
    assert_eq!(storage.list().unwrap(), vec!["v7".to_string()]);
    assert_eq!(
      host.calls(),
      vec![HostCall::SkipWaiting, HostCall::ClaimClients]
    );
  }

  #[tokio::test]
  async fn test_start_fails_when_activation_fails() {
    let storage = Arc::new(FlakyStorage::new());
    let network = Arc::new(StubNetwork::default());
    let seeds = Config::for_scope(Url::parse(SCOPE).unwrap()).seed_urls().unwrap();
    for url in &seeds {
      network.respond(url.as_str(), Response::new(200, "seed"));
    }
    storage.open("v6").unwrap();

    let mut lifecycle = Lifecycle::new(
      GenerationCache::new(storage.clone(), "v7"),
      network.clone(),
      Arc::new(RecordingHost::default()),
      seeds,
    );

    assert!(lifecycle.start().await.is_err());
    assert_eq!(lifecycle.state(), WorkerState::Installed);

    // The next start only has to activate
    let calls = network.call_count();
    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Active);
    assert_eq!(network.call_count(), calls);
  }
}
