//! Connected client views and the notification broadcaster.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::VersionToken;

/// Message posted to every connected view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  VersionChanged { version: VersionToken },
}

/// Something delivered to a client view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
  Message(ClientMessage),
  /// Reload by navigating to the given location
  Navigate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  /// A page that can be navigated
  Window,
  /// A background context that only receives messages
  Worker,
}

struct ClientEntry {
  id: u64,
  kind: ClientKind,
  url: String,
  controlled: bool,
  tx: mpsc::UnboundedSender<ClientEvent>,
}

/// Receiving end held by a client view.
pub struct ClientHandle {
  pub id: u64,
  rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientHandle {
  /// Wait for the next event.
  pub async fn next(&mut self) -> Option<ClientEvent> {
    self.rx.recv().await
  }
}

/// Registry of connected views.
#[derive(Clone, Default)]
pub struct ClientRegistry {
  clients: Arc<Mutex<Vec<ClientEntry>>>,
  next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<ClientEntry>> {
    // A panic while holding the lock leaves the list itself intact
    self
      .clients
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Connect a view currently showing `url`.
  pub fn register(&self, kind: ClientKind, url: impl Into<String>) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.lock().push(ClientEntry {
      id,
      kind,
      url: url.into(),
      controlled: false,
      tx,
    });
    ClientHandle { id, rx }
  }

  /// Take control of every open view. Returns how many were claimed.
  pub fn claim(&self) -> usize {
    let mut clients = self.lock();
    clients.retain(|c| !c.tx.is_closed());
    for client in clients.iter_mut() {
      client.controlled = true;
    }
    clients.len()
  }

  pub fn is_controlled(&self, id: u64) -> bool {
    self.lock().iter().any(|c| c.id == id && c.controlled)
  }

  /// Post a message to every connected view. Returns the number reached.
  pub fn broadcast(&self, message: &ClientMessage) -> usize {
    let mut clients = self.lock();
    clients.retain(|c| c.tx.send(ClientEvent::Message(message.clone())).is_ok());
    debug!(delivered = clients.len(), ?message, "broadcast");
    clients.len()
  }

  /// Ask every window to navigate to its current location.
  pub fn reload_windows(&self) -> usize {
    let mut clients = self.lock();
    clients.retain(|c| !c.tx.is_closed());
    clients
      .iter()
      .filter(|c| c.kind == ClientKind::Window)
      .filter(|c| c.tx.send(ClientEvent::Navigate(c.url.clone())).is_ok())
      .count()
  }
}

#[cfg(test)]
impl ClientHandle {
  /// Drain everything already delivered.
  pub fn drain(&mut self) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}

#[cfg(test)]
impl ClientRegistry {
  pub fn len(&self) -> usize {
    self.lock().len()
  }
}
