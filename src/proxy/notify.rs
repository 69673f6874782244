//! Push, notification-click and background sync entry points.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::host::Host;
use crate::config::Config;

/// A notification the host is asked to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Url,
  pub badge: Url,
  pub vibrate: Vec<u32>,
}

/// Stateless bridge from push/sync signals to the host.
pub struct NotificationBridge<H: Host> {
  host: Arc<H>,
  title: String,
  placeholder: String,
  icon: Url,
  badge: Url,
  vibrate: Vec<u32>,
  open_url: Url,
  sync_tag: String,
}

impl<H: Host> NotificationBridge<H> {
  pub fn new(config: &Config, host: Arc<H>) -> Result<Self> {
    let settings = &config.notification;

    Ok(Self {
      host,
      title: settings.title.clone(),
      placeholder: settings.placeholder.clone(),
      icon: config.resolve(&settings.icon)?,
      badge: config.resolve(&settings.badge)?,
      vibrate: settings.vibrate.clone(),
      open_url: config.resolve(&settings.open_url)?,
      sync_tag: config.sync_tag.clone(),
    })
  }

  /// Build the notification for a push payload. Empty payloads get the placeholder.
  pub fn notification_for(&self, payload: Option<&str>) -> Notification {
    let body = payload
      .filter(|text| !text.is_empty())
      .unwrap_or(self.placeholder.as_str());

    Notification {
      title: self.title.clone(),
      body: body.to_string(),
      icon: self.icon.clone(),
      badge: self.badge.clone(),
      vibrate: self.vibrate.clone(),
    }
  }

  pub async fn on_push(&self, payload: Option<&str>) -> Result<()> {
    let notification = self.notification_for(payload);
    debug!(body = %notification.body, "Push received");
    self.host.show_notification(&notification).await
  }

  /// Dismiss the notification and bring up the app's root window.
  pub async fn on_notification_click(&self, tag: Option<&str>) -> Result<()> {
    self.host.close_notification(tag).await?;
    self.host.open_window(&self.open_url).await
  }

  /// Returns whether the tag is the one reserved for data sync.
  pub fn on_sync(&self, tag: &str) -> bool {
    if tag == self.sync_tag {
      // Reserved for data synchronization with the server
      info!(tag, "Background sync");
      true
    } else {
      debug!(tag, "Ignoring unknown sync tag");
      false
    }
  }
}
