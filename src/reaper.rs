//! Background sweeper thread.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

/// Work performed by the sweeper on every run.
pub(crate) trait Sweep: Send + Sync + 'static {
    /// Examine the pool once. Must not panic, but a panic does not stop the schedule.
    fn sweep(&self);
}

/// Stop flag the sweeper thread sleeps on.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Periodic sweeper running on a dedicated thread.
///
/// Holds only a weak reference to the swept target, so it never keeps a pool alive.
#[derive(Debug)]
pub(crate) struct Reaper {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn the sweeper thread.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the operating system refused to create a thread.
    pub(crate) fn start<T: Sweep>(
        name: &str,
        interval: Duration,
        target: Weak<T>,
    ) -> std::io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = signal.clone();
        let thread = thread::Builder::new()
            .name(format!("[Pool-Cleaner]:{name}"))
            .spawn(move || run(&thread_signal, interval, &target))?;
        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    /// Stop the sweeper, optionally waiting for a running sweep to finish.
    pub(crate) fn stop(&mut self, join: bool) {
        *self.signal.stopped.lock() = true;
        self.signal.cond.notify_all();
        let Some(thread) = self.thread.take() else {
            return;
        };
        // A sweep may end up dropping the last pool reference on the sweeper thread itself.
        if join && thread.thread().id() != thread::current().id() && thread.join().is_err() {
            error!("pool sweeper thread panicked");
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop(false);
    }
}

fn run<T: Sweep>(signal: &StopSignal, interval: Duration, target: &Weak<T>) {
    debug!(?interval, "pool sweeper started");
    let mut next_run = Instant::now() + interval;
    loop {
        {
            let mut stopped = signal.stopped.lock();
            while !*stopped && Instant::now() < next_run {
                signal.cond.wait_until(&mut stopped, next_run);
            }
            if *stopped {
                break;
            }
        }
        let Some(target) = target.upgrade() else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(|| target.sweep())).is_err() {
            error!("pool sweep panicked");
        }
        drop(target);
        next_run = Instant::now() + interval;
    }
    debug!("pool sweeper stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
        panic_on_first: bool,
    }

    impl Sweep for Counter {
        fn sweep(&self) {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && run == 0 {
                panic!("first sweep fails");
            }
        }
    }

    #[test]
    fn runs_periodically_until_stopped() {
        let target = Arc::new(Counter::default());
        let mut reaper =
            Reaper::start("test", Duration::from_millis(10), Arc::downgrade(&target)).unwrap();
        while target.runs.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        reaper.stop(true);
        let runs = target.runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(target.runs.load(Ordering::SeqCst), runs);
    }

    #[test]
    fn panic_does_not_stop_schedule() {
        let target = Arc::new(Counter {
            panic_on_first: true,
            ..Default::default()
        });
        let mut reaper =
            Reaper::start("test", Duration::from_millis(5), Arc::downgrade(&target)).unwrap();
        while target.runs.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        reaper.stop(true);
    }

    #[test]
    fn exits_when_target_dropped() {
        let target = Arc::new(Counter::default());
        let mut reaper =
            Reaper::start("test", Duration::from_millis(5), Arc::downgrade(&target)).unwrap();
        drop(target);
        let handle = reaper.thread.take().unwrap();
        handle.join().unwrap();
    }
}
