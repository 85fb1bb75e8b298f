//! Cancellation signalling shared by the walker, hasher, and rate limiter.
//!
//! A single atomic flag backs every cancellation source: Ctrl-C/SIGTERM,
//! the `--timeout` deadline, and internal run aborts. Workers poll the
//! token between jobs and between read chunks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trips this token after `timeout` elapses.
    ///
    /// The timer runs on a detached thread; if the process finishes first
    /// the thread dies with it.
    pub fn cancel_after(&self, timeout: Duration) {
        let token = self.clone();
        thread::spawn(move || {
            thread::sleep(timeout);
            if !token.is_cancelled() {
                warn!("Deadline of {:.0?} reached, cancelling", timeout);
                token.cancel();
            }
        });
    }
}

/// Installs a SIGINT/SIGTERM handler that trips `token`.
///
/// Installation failure (e.g. a handler already registered by a test
/// harness) is logged and otherwise ignored; manual cancellation still
/// works.
pub fn install_signal_handler(token: &CancelToken) {
    let token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupted, stopping...");
        token.cancel();
    }) {
        debug!("Signal handler not installed: {e}");
    }
}
