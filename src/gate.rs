//! # Gate
//!
//! Runs a callback once the host's instrumentation subsystem is live. The callback runs right away
//! when the subsystem is already ready, and otherwise on the host's ready signal. It never runs more
//! than once, even if the host repeats the signal.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::hook::HookHost;

/// How [`on_ready`] handled a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// The subsystem was ready; the callback has already run
    Immediate,
    /// The callback is queued for the ready signal
    Deferred,
    /// The host has no subsystem; the callback was dropped without running
    Unavailable,
}

/// A callback that runs at most once however many times it is fired
struct OneShot<F> {
    /// Taken on the first fire
    callback: Mutex<Option<F>>,
}
impl<F: FnOnce()> OneShot<F> {
    /// Wraps `callback`
    fn new(callback: F) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    /// Runs the callback unless it already ran. The lock is released before running it.
    fn fire(&self) {
        let callback = self.callback.lock().take();
        match callback {
            Some(callback) => callback(),
            None => debug!("ignoring repeated ready signal"),
        }
    }
}

/// Arranges for `callback` to run exactly once, as soon as `host`'s instrumentation subsystem is
/// ready
pub fn on_ready<H, F>(host: &H, callback: F) -> Readiness
where
    H: HookHost + ?Sized,
    F: FnOnce() + Send + 'static,
{
    if !host.is_installed() {
        debug!("no instrumentation subsystem, not waiting for it");
        return Readiness::Unavailable;
    }
    if host.is_ready() {
        callback();
        return Readiness::Immediate;
    }
    let shot = Arc::new(OneShot::new(callback));
    host.when_ready(Box::new(move || shot.fire()));
    debug!("waiting for the instrumentation subsystem");
    Readiness::Deferred
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::runtime::testing::City;

    /// A callback that counts its runs
    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let runs = Arc::clone(&count);
        (count, move || {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_ready_runs_immediately() {
        let city = City::load_ready();
        let (count, callback) = counter();
        assert_eq!(on_ready(&*city.runtime, callback), Readiness::Immediate);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_until_signal() {
        let city = City::load();
        let (count, callback) = counter();
        assert_eq!(on_ready(&*city.runtime, callback), Readiness::Deferred);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        city.runtime.signal_ready();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        city.runtime.signal_ready();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_never_runs() {
        let city = City::load_without_hooks();
        let (count, callback) = counter();
        assert_eq!(on_ready(&*city.runtime, callback), Readiness::Unavailable);
        city.runtime.signal_ready();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let (count, callback) = counter();
        let shot = OneShot::new(callback);
        shot.fire();
        shot.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
