use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use url::Url;

use crate::http::{Request, RequestMode};

/// Events delivered by the hosting runtime
#[derive(Debug)]
pub enum HostEvent {
  Install,
  Activate,
  /// Outgoing request from the page
  Fetch(Request),
  /// Background sync with its tag
  Sync(String),
  /// Push message with optional text payload
  Push(Option<String>),
  /// Click on a notification, with its tag
  NotificationClick(Option<String>),
}

/// JSON shape of one event line, e.g. `{"type":"fetch","url":"/app.js"}`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireEvent {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    mode: RequestMode,
    #[serde(default)]
    headers: Vec<(String, String)>,
  },
  Sync {
    tag: String,
  },
  Push {
    #[serde(default)]
    data: Option<String>,
  },
  NotificationClick {
    #[serde(default)]
    tag: Option<String>,
  },
}

/// Parse one event line. Relative URLs resolve against `scope`.
pub fn parse_event(line: &str, scope: &Url) -> Result<HostEvent> {
  let wire: WireEvent =
    serde_json::from_str(line).map_err(|e| eyre!("Invalid event '{}': {}", line, e))?;

  let event = match wire {
    WireEvent::Install => HostEvent::Install,
    WireEvent::Activate => HostEvent::Activate,
    WireEvent::Fetch {
      url,
      method,
      mode,
      headers,
    } => {
      let url = scope
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let method = match method {
        Some(m) => parse_method(&m)?,
        None => Method::GET,
      };

      HostEvent::Fetch(Request {
        method,
        url,
        mode,
        headers,
      })
    }
    WireEvent::Sync { tag } => HostEvent::Sync(tag),
    WireEvent::Push { data } => HostEvent::Push(data),
    WireEvent::NotificationClick { tag } => HostEvent::NotificationClick(tag),
  };

  Ok(event)
}

pub fn parse_method(method: &str) -> Result<Method> {
  Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))
}

/// Event source that reads JSON-lines events from a reader on a background task
pub struct EventSource {
  rx: mpsc::UnboundedReceiver<Result<HostEvent>>,
}

impl EventSource {
  /// Blank lines and lines starting with `#` are skipped
  pub fn new<R>(reader: R, scope: Url) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn event reader
    tokio::spawn(async move {
      let mut lines = reader.lines();
      let mut number = 0usize;

      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            let _ = tx.send(Err(eyre!("Failed to read events: {}", e)));
            break;
          }
        };
        number += 1;

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
          continue;
        }

        let event = parse_event(line, &scope).map_err(|e| eyre!("Line {}: {}", number, e));
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Result<HostEvent>> {
    self.rx.recv().await
  }
}
