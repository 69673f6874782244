//! Offline interception proxy.
//!
//! Every request from the page goes through the router: network first,
//! cache on failure, shell document for offline navigations. The
//! lifecycle seeds a new cache generation on install and removes the
//! old ones on activate. [`ProxyWorker`] ties both together with the
//! notification bridge and is what the host talks to.

mod host;
mod lifecycle;
mod network;
mod notify;
mod router;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use host::TerminalHost;
pub use network::{HttpNetwork, Network};
pub use router::Outcome;
pub use worker::{Dispatched, Fetched, ProxyWorker};
