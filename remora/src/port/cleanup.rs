//! Process-wide registry of ports pending cleanup.
//!
//! Worker tasks register the ports they own; process shutdown drains the
//! registry with a best-effort force-close of everything still alive. The
//! lock guards only the list itself, never any I/O, and the drain
//! tolerates the set changing concurrently by yielding first and popping
//! one entry at a time. No new registration is accepted once a drain has
//! begun.
use std::sync::{Arc, Mutex, OnceLock};

use super::PortLife;

#[derive(Default)]
struct State {
    closing: bool,
    ports: Vec<Arc<PortLife>>,
}

/// Registry of live ports a shutdown must reach.
#[derive(Default)]
pub struct PortsCleanup {
    state: Mutex<State>,
}

impl PortsCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-scoped registry.
    pub fn global() -> &'static PortsCleanup {
        static GLOBAL: OnceLock<PortsCleanup> = OnceLock::new();
        GLOBAL.get_or_init(PortsCleanup::new)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a port; ignored while a drain is in progress.
    pub fn register(&self, port: &Arc<PortLife>) {
        let mut state = self.lock();
        if state.closing {
            return;
        }
        state.ports.push(port.clone());
    }

    /// Forget a port that closed in an orderly fashion.
    pub fn unregister(&self, port: &Arc<PortLife>) {
        let mut state = self.lock();
        if state.closing {
            return;
        }
        state.ports.retain(|p| !Arc::ptr_eq(p, port));
    }

    pub fn len(&self) -> usize {
        self.lock().ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ports.is_empty()
    }

    /// Best-effort drain: mark the registry closing, yield so in-flight
    /// registrations settle, then force-close every remaining port. The
    /// registry is usable again afterwards.
    pub async fn close_ports(&self) {
        {
            let mut state = self.lock();
            if state.closing {
                return;
            }
            state.closing = true;
        }

        tokio::task::yield_now().await;

        loop {
            let port = self.lock().ports.pop();
            match port {
                Some(port) => port.force_close(),
                None => break,
            }
        }

        self.lock().closing = false;
    }
}
