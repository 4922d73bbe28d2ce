use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

/// Token-bucket rate limiter over one-second windows.
///
/// Each client read loop reports the bytes and frames it pulled off the
/// wire; once either counter for that client reaches its limit, the
/// reporting call suspends the reader until the next window. A single
/// periodic task zeroes the counters and wakes every suspended reader.
///
/// The limiter knows clients only by numeric id, so it can never keep a
/// dropped client alive, and the handle is cheap to clone across
/// connections. The sweep task holds a weak reference and exits on its own
/// once the last handle is gone.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    bytes_per_second_limit: usize,
    frames_per_second_limit: usize,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    bytes_in_window: HashMap<u64, usize>,
    frames_in_window: HashMap<u64, usize>,
    suspended: HashMap<u64, Arc<Notify>>,
}

impl RateLimiter {
    pub fn new(bytes_per_second_limit: usize, frames_per_second_limit: usize) -> Self {
        assert!(bytes_per_second_limit > 0, "byte limit must be positive");
        assert!(frames_per_second_limit > 0, "frame limit must be positive");

        let inner = Arc::new(Inner {
            bytes_per_second_limit,
            frames_per_second_limit,
            state: Mutex::new(State::default()),
        });

        tokio::spawn(sweep(Arc::downgrade(&inner)));

        Self { inner }
    }

    pub fn bytes_per_second_limit(&self) -> usize {
        self.inner.bytes_per_second_limit
    }

    pub fn frames_per_second_limit(&self) -> usize {
        self.inner.frames_per_second_limit
    }

    /// Records bytes read for `id`, suspending the caller when the byte
    /// budget for the current window is exhausted.
    pub async fn notify_bytes_received(&self, id: u64, count: usize) {
        let notify = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let total = state.bytes_in_window.entry(id).or_insert(0);
            *total = total.saturating_add(count);
            if *total < self.inner.bytes_per_second_limit {
                return;
            }
            debug!("client {id} exceeded byte rate limit, suspending reader");
            state.suspension(id)
        };
        notify.notified().await;
    }

    /// Records frames read for `id`, suspending the caller when the frame
    /// budget for the current window is exhausted.
    pub async fn notify_frames_received(&self, id: u64, count: usize) {
        if count == 0 {
            return;
        }
        let notify = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let total = state.frames_in_window.entry(id).or_insert(0);
            *total = total.saturating_add(count);
            if *total < self.inner.frames_per_second_limit {
                return;
            }
            debug!("client {id} exceeded frame rate limit, suspending reader");
            state.suspension(id)
        };
        notify.notified().await;
    }
}

impl State {
    fn suspension(&mut self, id: u64) -> Arc<Notify> {
        self.suspended
            .entry(id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

async fn sweep(inner: Weak<Inner>) {
    let mut ticker = interval(Duration::from_secs(1));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.bytes_in_window.clear();
        state.frames_in_window.clear();
        for (_, notify) in state.suspended.drain() {
            notify.notify_one();
        }
    }
}
