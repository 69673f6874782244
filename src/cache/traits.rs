//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::str::FromStr;

use crate::http::{RequestIdentity, Response};

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations, each an independent
/// map from request identity to response snapshot.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Look up a single entry.
  fn get(&self, generation: &str, identity: &RequestIdentity) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite a single entry.
  fn put(&self, generation: &str, identity: &RequestIdentity, response: &Response) -> Result<()>;

  /// Write a whole seed set and mark the generation installed, atomically.
  fn commit_seeds(&self, generation: &str, entries: &[(RequestIdentity, Response)]) -> Result<()>;

  /// Drop a generation and everything in it. Returns false if it did not exist.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// Names of all stored generations, oldest first.
  fn list(&self) -> Result<Vec<String>>;

  /// Lifecycle state recorded for a generation.
  fn generation_state(&self, generation: &str) -> Result<Option<GenerationState>>;

  fn set_generation_state(&self, generation: &str, state: GenerationState) -> Result<()>;

  /// Summary of every generation, oldest first.
  fn describe(&self) -> Result<Vec<GenerationInfo>>;
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the snapshot was captured
  pub cached_at: DateTime<Utc>,
}

/// Persisted lifecycle state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Opened, seed set not committed (in progress or failed)
  Installing,
  /// Seed set committed, ready to activate
  Installed,
  /// Serving requests
  Active,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Active => "active",
    }
  }
}

impl FromStr for GenerationState {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "active" => Ok(Self::Active),
      other => Err(eyre!("Unknown generation state '{}'", other)),
    }
  }
}

impl fmt::Display for GenerationState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Summary row for one generation.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
  pub name: String,
  pub state: GenerationState,
  pub created_at: DateTime<Utc>,
  pub entries: usize,
}
