//! Elapsed-time watchdog for the run loop.
//!
//! Each loop iteration registers the branch it is about to execute; the
//! next call to [`Elapser::check`] logs a warning if the previous branch
//! overran the threshold. Mirrors the run loop's own cadence, so a branch
//! that blocks is reported as soon as the loop turns again.

use std::time::{Duration, Instant};

/// Tracks the duration of named units of work and warns on overruns.
pub struct Elapser {
    threshold: Duration,
    current: Option<(&'static str, Instant)>,
}

impl Elapser {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            current: None,
        }
    }

    /// Close out the previous unit, warning if it exceeded the threshold.
    pub fn check(&mut self) {
        if let Some((name, started)) = self.current.take() {
            let elapsed = started.elapsed();
            if elapsed > self.threshold {
                tracing::warn!(
                    branch = name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = self.threshold.as_millis() as u64,
                    "run loop branch exceeded duration threshold"
                );
            }
        }
    }

    /// Begin timing a named unit of work.
    pub fn register(&mut self, name: &'static str) {
        self.current = Some((name, Instant::now()));
    }

    /// Time a closure directly, checking immediately after it returns.
    pub fn time<T>(&mut self, name: &'static str, f: impl FnOnce() -> T) -> T {
        self.register(name);
        let out = f();
        self.check();
        out
    }
}
