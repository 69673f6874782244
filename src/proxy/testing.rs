//! Test doubles for the network and the host.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

use super::host::Host;
use super::network::Network;
use super::notify::Notification;
use crate::http::{Request, Response};

/// Network that answers from a fixed table. Unknown URLs behave as offline.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<String, Option<Response>>>,
  calls: Mutex<Vec<String>>,
}

impl StubNetwork {
  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Some(response));
  }

  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), None);
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.url.to_string());

    match self.routes.lock().unwrap().get(request.url.as_str()) {
      Some(Some(response)) => Ok(response.clone()),
      _ => Err(eyre!("connection refused: {}", request.url)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
  SkipWaiting,
  ClaimClients,
  Notify(Notification),
  Close(Option<String>),
  Open(Url),
}

/// Host that records every call.
#[derive(Default)]
pub struct RecordingHost {
  calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
  pub fn calls(&self) -> Vec<HostCall> {
    self.calls.lock().unwrap().clone()
  }

  fn record(&self, call: HostCall) -> Result<()> {
    self.calls.lock().unwrap().push(call);
    Ok(())
  }
}

#[async_trait]
impl Host for RecordingHost {
  async fn skip_waiting(&self) -> Result<()> {
    self.record(HostCall::SkipWaiting)
  }

  async fn claim_clients(&self) -> Result<()> {
    self.record(HostCall::ClaimClients)
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.record(HostCall::Notify(notification.clone()))
  }

  async fn close_notification(&self, tag: Option<&str>) -> Result<()> {
    self.record(HostCall::Close(tag.map(String::from)))
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    self.record(HostCall::Open(url.clone()))
  }
}
