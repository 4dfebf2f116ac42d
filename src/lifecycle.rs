//! Install and activate transitions.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::cache::DualTierStore;
use crate::clients::ClientRegistry;
use crate::net::Fetcher;
use crate::reconcile::{Reconciler, WarmReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  New,
  Installing,
  /// Primed and waiting to activate
  Installed,
  Activating,
  Activated,
}

/// Outcome of activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  /// Blob namespaces left behind by earlier generations
  pub evicted: Vec<String>,
  /// Views taken over
  pub claimed: usize,
}

/// Drives the agent through install and activate.
pub struct LifecycleController<F: Fetcher> {
  reconciler: Arc<Reconciler<F>>,
  store: DualTierStore,
  clients: ClientRegistry,
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
}

impl<F: Fetcher> LifecycleController<F> {
  pub fn new(reconciler: Arc<Reconciler<F>>, store: DualTierStore, clients: ClientRegistry) -> Self {
    Self {
      reconciler,
      store,
      clients,
      state: Mutex::new(LifecycleState::New),
      skip_waiting: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
  }

  /// Activation was requested without waiting for older instances.
  pub fn wants_immediate_activation(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Prime both tiers and request immediate activation.
  pub async fn install(&self) -> WarmReport {
    self.set_state(LifecycleState::Installing);
    info!(namespace = %self.store.namespace(), "installing");

    let report = self.reconciler.prime().await;

    self.skip_waiting.store(true, Ordering::SeqCst);
    self.set_state(LifecycleState::Installed);
    report
  }

  /// Purge stale blob namespaces and take control of every open view.
  pub fn activate(&self) -> Result<ActivationReport> {
    self.set_state(LifecycleState::Activating);

    let live = self.store.namespace().to_string();
    self.store.open_live_namespace()?;
    let evicted = self.store.evict_except(&live)?;
    for name in &evicted {
      info!(namespace = %name, "deleted stale cache namespace");
    }

    let claimed = self.clients.claim();
    self.set_state(LifecycleState::Activated);
    info!(namespace = %live, claimed, "activated");

    Ok(ActivationReport { evicted, claimed })
  }
}
