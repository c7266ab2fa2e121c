//! Application state management

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    running: AtomicBool,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Whether a sync run is currently executing
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Claim the single run slot. Returns `None` while another run holds
    /// it; the slot is released when the returned guard drops.
    pub fn try_begin_run(&self) -> Option<RunGuard> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                inner: self.inner.clone(),
            })
    }
}

/// Releases the run slot on drop, including on panics and cancellation.
pub struct RunGuard {
    inner: Arc<AppStateInner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_slot_is_exclusive_until_released() {
        let state = AppState::new(Config::default());
        assert!(!state.is_running());

        let guard = state.try_begin_run().expect("slot free");
        assert!(state.is_running());
        assert!(state.try_begin_run().is_none());

        drop(guard);
        assert!(!state.is_running());
        assert!(state.try_begin_run().is_some());
    }
}
