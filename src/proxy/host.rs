//! Callbacks into the runtime hosting the proxy.

use async_trait::async_trait;
use color_eyre::Result;
use tracing::info;
use url::Url;

use super::notify::Notification;

/// The hosting runtime, as seen by the proxy.
#[async_trait]
pub trait Host: Send + Sync {
  /// Move straight on to activation without waiting for old clients to close.
  async fn skip_waiting(&self) -> Result<()>;

  /// Start controlling every open client immediately.
  async fn claim_clients(&self) -> Result<()>;

  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  async fn close_notification(&self, tag: Option<&str>) -> Result<()>;

  /// Open (or focus) a window on `url`.
  async fn open_window(&self, url: &Url) -> Result<()>;
}

/// Host that reports to the terminal.
pub struct TerminalHost;

#[async_trait]
impl Host for TerminalHost {
  async fn skip_waiting(&self) -> Result<()> {
    info!("Skipping wait for previous clients");
    Ok(())
  }

  async fn claim_clients(&self) -> Result<()> {
    info!("Claimed open clients");
    Ok(())
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    println!("[{}] {}", notification.title, notification.body);
    Ok(())
  }

  async fn close_notification(&self, tag: Option<&str>) -> Result<()> {
    info!(tag = tag.unwrap_or("-"), "Notification closed");
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    println!("open {}", url);
    Ok(())
  }
}
