//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

/// Cloneable cancellation token
///
/// Cancelling drops the only sender of an internal channel, which wakes every
/// clone blocked in [`Shutdown::sleep`] at once.
#[derive(Clone)]
pub struct Shutdown {
    cancelled: Arc<AtomicBool>,
    wake: Receiver<()>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: rx,
            trigger: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Request shutdown. Safe to call from a signal handler thread, and more
    /// than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns true if shutdown was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.wake.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            // Nothing is ever sent; any wake-up means the sender is gone
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_runs_full_duration() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancelled_token_does_not_sleep() {
        let shutdown = Shutdown::new();
        shutdown.cancel();
        shutdown.cancel();

        assert!(shutdown.is_cancelled());
        assert!(shutdown.sleep(Duration::from_secs(30)));
    }
}
