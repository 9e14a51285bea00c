//! Offline mode signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Reports whether the device is currently offline.
///
/// Read at the start of every engine call; implementations must not cache.
pub trait OfflineSignal: Send + Sync {
  fn is_offline(&self) -> bool;
}

/// Shared, toggleable offline flag.
#[derive(Debug, Clone, Default)]
pub struct OfflineFlag {
  offline: Arc<AtomicBool>,
}

impl OfflineFlag {
  pub fn new(offline: bool) -> Self {
    Self {
      offline: Arc::new(AtomicBool::new(offline)),
    }
  }

  pub fn set_offline(&self, offline: bool) {
    let was = self.offline.swap(offline, Ordering::SeqCst);
    if was != offline {
      info!(offline, "offline mode changed");
    }
  }
}

impl OfflineSignal for OfflineFlag {
  fn is_offline(&self) -> bool {
    self.offline.load(Ordering::SeqCst)
  }
}
