//! Cooperative stop flag shared by the poller thread and the consumer loop.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set-once, read-many flag. Clones share the same underlying flag.
///
/// Once [`trigger`](Self::trigger) has been called (or a registered signal has
/// arrived) the flag stays set for the rest of the process.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Arm the flag from SIGINT and SIGTERM.
    ///
    /// The installed handler only stores `true` into the atomic; it performs
    /// no I/O and no allocation. The handlers are removed when the returned
    /// guard is dropped.
    pub fn register_interrupts(&self) -> io::Result<InterruptGuard> {
        let mut ids = Vec::with_capacity(2);
        for signal in [SIGINT, SIGTERM] {
            match signal_hook::flag::register(signal, Arc::clone(&self.flag)) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        signal_hook::low_level::unregister(id);
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(target: "shutdown", "interrupt handlers registered");
        Ok(InterruptGuard { ids })
    }
}

/// Keeps the signal registrations made by
/// [`ShutdownSignal::register_interrupts`] alive.
#[derive(Debug)]
pub struct InterruptGuard {
    ids: Vec<SigId>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        tracing::debug!(target: "shutdown", "interrupt handlers removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::{Duration, Instant};

    #[test]
    fn trigger_reports_first_call_only() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();
        assert!(!other.is_triggered());
        assert!(signal.trigger());
        assert!(!other.trigger());
        assert!(other.is_triggered());
        assert!(signal.is_triggered());
    }

    #[test]
    #[serial(signals)]
    fn sigint_arms_the_flag() {
        let signal = ShutdownSignal::new();
        let guard = signal.register_interrupts().unwrap();
        signal_hook::low_level::raise(SIGINT).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !signal.is_triggered() && Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert!(signal.is_triggered());
        drop(guard);
    }
}
