//! Periodic execution of control-loop ticks on dedicated worker threads.
use std::{
    fmt::Display,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::error;

/// Runs a fallible task at a fixed cadence until stopped. The interval is
/// measured from completion to the next start, not fixed-phase. A failing or
/// panicking task is reported and the next tick still fires.
pub struct PeriodicRunner {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PeriodicRunner {
    /// Spawns a worker that invokes `task` every `interval` until [`stop`] is
    /// called.
    ///
    /// [`stop`]: PeriodicRunner::stop
    pub fn spawn<F, E>(name: &str, interval: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let name = name.to_string();
        let handle = thread::spawn(move || {
            while !stop_clone.load(Ordering::SeqCst) {
                match catch_unwind(AssertUnwindSafe(&mut task)) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!("{name} tick failed: {err}"),
                    Err(_) => error!("{name} tick panicked"),
                }

                let mut slept = Duration::ZERO;
                while slept < interval {
                    if stop_clone.load(Ordering::SeqCst) {
                        return;
                    }

                    let remaining = interval.saturating_sub(slept);
                    let step = if remaining > Duration::from_millis(100) {
                        Duration::from_millis(100)
                    } else {
                        remaining
                    };
                    thread::sleep(step);
                    slept += step;
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the worker and waits for the in-flight iteration to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicRunner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
