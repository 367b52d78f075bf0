//! # Debounce Timer
//!
//! A one-shot timer whose deadline can be pushed out after it is armed.
//! The callback runs at most once, after the deadline passes without a
//! further reset.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Reschedulable one-shot timer backed by a tokio task
#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Arc<Mutex<Instant>>,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DebounceTimer {
    /// Arm a timer that runs `on_fire` once `delay` has elapsed since the
    /// last [`reset`](Self::reset).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Arc::new(Mutex::new(Instant::now() + delay));
        let watched = Arc::clone(&deadline);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);

        let handle = tokio::spawn(async move {
            loop {
                let target = read_deadline(&watched);
                tokio::time::sleep_until(target).await;
                if Instant::now() >= read_deadline(&watched) {
                    break;
                }
            }
            fired_flag.store(true, Ordering::SeqCst);
            on_fire().await;
        });

        Self {
            delay,
            deadline,
            fired,
            handle,
        }
    }

    /// Push the deadline out to `now + delay`
    pub fn reset(&self) {
        match self.deadline.lock() {
            Ok(mut deadline) => *deadline = Instant::now() + self.delay,
            Err(poisoned) => *poisoned.into_inner() = Instant::now() + self.delay,
        }
    }

    /// Abort the timer. Has no effect once the callback has started.
    pub fn cancel(&self) {
        if !self.has_fired() {
            self.handle.abort();
        }
    }

    /// Whether the deadline passed and the callback started
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Current deadline
    pub fn deadline(&self) -> Instant {
        read_deadline(&self.deadline)
    }
}

fn read_deadline(deadline: &Mutex<Instant>) -> Instant {
    match deadline.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}
