//! Generation-scoped view over a cache storage backend.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;

use super::traits::{CacheStorage, CachedResponse, GenerationState};
use crate::http::{Request, RequestIdentity, Response};

/// Handle to a single cache generation.
///
/// Everything the request router reads or writes goes through this handle, so
/// it can never touch entries of another generation.
pub struct GenerationCache<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
}

impl<S: CacheStorage> GenerationCache<S> {
  pub fn new(storage: Arc<S>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Create the generation if it does not exist yet.
  pub fn open(&self) -> Result<()> {
    self.storage.open(&self.generation)
  }

  pub fn state(&self) -> Result<Option<GenerationState>> {
    self.storage.generation_state(&self.generation)
  }

  pub fn mark_active(&self) -> Result<()> {
    self
      .storage
      .set_generation_state(&self.generation, GenerationState::Active)
  }

  /// Look up the snapshot stored for this request.
  pub fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self.storage.get(&self.generation, &request.identity())
  }

  /// Store a snapshot, overwriting any previous one.
  ///
  /// Only GET requests answered with exactly 200 are accepted.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    check_storable(request, response)?;
    self
      .storage
      .put(&self.generation, &request.identity(), response)
  }

  /// Commit a complete seed set and mark the generation installed.
  pub fn commit_seeds(&self, entries: &[(Request, Response)]) -> Result<()> {
    let entries = entries
      .iter()
      .map(|(request, response)| -> Result<(RequestIdentity, Response)> {
        check_storable(request, response)?;
        Ok((request.identity(), response.clone()))
      })
      .collect::<Result<Vec<_>>>()?;

    self.storage.commit_seeds(&self.generation, &entries)
  }
}

fn check_storable(request: &Request, response: &Response) -> Result<()> {
  if request.method != Method::GET {
    return Err(eyre!("Refusing to cache {} request for {}", request.method, request.url));
  }
  if !response.is_ok() {
    return Err(eyre!(
      "Refusing to cache {} response for {}",
      response.status,
      request.url
    ));
  }
  Ok(())
}

impl<S: CacheStorage> Clone for GenerationCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
    }
  }
}
