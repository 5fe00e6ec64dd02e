//! Scan gating: suppress rapid re-scans of the same code.
//!
//! A camera aimed at a QR label decodes the same value many times per
//! second. Without a gate, every frame would start a fetch, an extraction,
//! and a history write. [`ScanGate::admit`] answers true exactly once per
//! cooldown window per distinct value; membership expires on a timer,
//! independent of whether the pipeline that ran on admission succeeded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Cooldown gate over decoded scan values. Clones share the pending set.
#[derive(Debug, Clone)]
pub struct ScanGate {
    pending: Arc<Mutex<HashSet<String>>>,
    cooldown: Duration,
}

impl ScanGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashSet::new())),
            cooldown,
        }
    }

    /// Admit `code` if it is not already within its cooldown window.
    ///
    /// On admission the code joins the pending set and a timer task removes
    /// it after the cooldown. Must be called within a Tokio runtime.
    pub fn admit(&self, code: &str) -> bool {
        {
            let mut pending = self.lock_pending();
            if !pending.insert(code.to_string()) {
                debug!("Scan suppressed, within cooldown: {}", code);
                return false;
            }
        }

        let pending = Arc::clone(&self.pending);
        let cooldown = self.cooldown;
        let expiring = code.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&expiring);
        });

        debug!("Scan admitted: {}", code);
        true
    }

    /// Whether `code` is currently within its cooldown window.
    pub fn is_pending(&self, code: &str) -> bool {
        self.lock_pending().contains(code)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned lock only means a panic elsewhere mid-insert; the set
        // is still usable.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
