//! Versioned response cache.
//!
//! This module provides:
//! - Named cache generations, each an independent request → response map
//! - Overwrite-only entry writes (last writer wins, no per-entry versioning)
//! - Atomic seed commits that mark a generation installed
//! - Whole-generation deletion for cleanup on activation

mod layer;
mod storage;
pub mod traits;

pub use layer::GenerationCache;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, GenerationState};
