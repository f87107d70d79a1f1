//! Named background loop with a shared shutdown flag.
//!
//! Each `Worker` owns exactly one thread. The step closure runs once per
//! iteration; errors and panics are logged at the iteration boundary and the
//! loop backs off briefly and continues. Dropping the worker raises the
//! shutdown flag and joins the thread.
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use counter_traits::Clock;

use crate::error::CounterError;
use crate::util::sleep_unless;

/// Pause after a failed or panicked iteration.
pub const FAULT_BACKOFF: Duration = Duration::from_millis(500);

pub struct Worker {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    iterations: Arc<AtomicU64>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn `step` every `period` (0 = back-to-back; the step paces itself).
    pub fn spawn<F>(
        name: &'static str,
        period: Duration,
        shutdown: Arc<AtomicBool>,
        clock: Arc<dyn Clock + Send + Sync>,
        mut step: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(&AtomicBool) -> Result<(), CounterError> + Send + 'static,
    {
        let iterations = Arc::new(AtomicU64::new(0));
        let iters = iterations.clone();
        let stop = shutdown.clone();
        let join_handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!(worker = name, "worker started");
                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let backoff = match catch_unwind(AssertUnwindSafe(|| step(&stop))) {
                        Ok(Ok(())) => period,
                        Ok(Err(e)) => {
                            tracing::warn!(worker = name, error = %e, "worker iteration failed");
                            period.max(FAULT_BACKOFF)
                        }
                        Err(_) => {
                            tracing::error!(worker = name, "worker iteration panicked");
                            period.max(FAULT_BACKOFF)
                        }
                    };
                    iters.fetch_add(1, Ordering::Relaxed);
                    if !sleep_unless(&*clock, backoff, &stop) {
                        break;
                    }
                }
                tracing::trace!(worker = name, "worker exiting cleanly");
            })?;
        Ok(Self {
            name,
            shutdown,
            iterations,
            join_handle: Some(join_handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().is_none_or(std::thread::JoinHandle::is_finished)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!(worker = self.name, "worker joined"),
                Err(e) => tracing::warn!(worker = self.name, ?e, "worker panicked during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counter_traits::MonotonicClock;
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn failures_and_panics_do_not_stop_the_loop() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut n = 0u32;
        let w = Worker::spawn(
            "test-worker",
            Duration::from_millis(1),
            flag.clone(),
            Arc::new(MonotonicClock::new()),
            move |_| {
                n += 1;
                match n {
                    1 => Err(CounterError::SinkFault("first".into())),
                    2 => panic!("second"),
                    _ => Ok(()),
                }
            },
        )
        .unwrap();
        assert_eq!(w.name(), "test-worker");
        // two back-offs of FAULT_BACKOFF, then normal iterations
        wait_until(|| w.iterations() >= 4);
        assert!(!w.is_finished());
        drop(w);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn raised_flag_ends_the_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let w = Worker::spawn(
            "test-stop",
            Duration::from_millis(1),
            flag.clone(),
            Arc::new(MonotonicClock::new()),
            |_| Ok(()),
        )
        .unwrap();
        flag.store(true, Ordering::Relaxed);
        wait_until(|| w.is_finished());
    }
}
