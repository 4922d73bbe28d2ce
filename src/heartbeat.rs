use crate::client::ClientShared;
use crate::close::CloseCode;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{interval, Duration, Instant};

/// Watchdog that pings idle clients and evicts unresponsive ones.
///
/// Clients are kept in an insertion-ordered due queue: the earliest
/// deadline sits at the front, and rescheduling moves an entry to the back.
/// A single one-second sweep walks expired entries only, so insert, update
/// and remove all stay O(1) and the sweep is O(expired).
///
/// Entries hold weak client references; a client dropped by the
/// application simply vanishes from the queue on its next due date.
#[derive(Clone)]
pub struct HeartbeatQueue {
    inner: Arc<Inner>,
}

struct Inner {
    period: Duration,
    queued_ping_limit: u64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    // Lazy deletion: stale (id, epoch) pairs are skipped during the sweep,
    // which keeps update() O(1) instead of hunting through the queue.
    order: VecDeque<(u64, u64)>,
    entries: HashMap<u64, Entry>,
}

struct Entry {
    due: Instant,
    epoch: u64,
    client: Weak<ClientShared>,
}

impl HeartbeatQueue {
    pub fn new(period: Duration, queued_ping_limit: u32) -> Self {
        let inner = Arc::new(Inner {
            period,
            queued_ping_limit: queued_ping_limit as u64,
            state: Mutex::new(State::default()),
        });

        tokio::spawn(sweep(Arc::downgrade(&inner)));

        Self { inner }
    }

    pub(crate) fn register(&self, id: u64, client: Weak<ClientShared>) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let due = Instant::now() + self.inner.period;
        state.entries.insert(
            id,
            Entry {
                due,
                epoch: 0,
                client,
            },
        );
        state.order.push_back((id, 0));
    }

    /// Pushes the next ping for `id` out by a full period; called by the
    /// read loop whenever traffic arrives, since traffic proves liveness.
    pub fn update(&self, id: u64) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let due = Instant::now() + self.inner.period;
        let epoch = match state.entries.get_mut(&id) {
            Some(entry) => {
                entry.due = due;
                entry.epoch += 1;
                entry.epoch
            }
            None => return,
        };
        state.order.push_back((id, epoch));
    }

    pub fn remove(&self, id: u64) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.remove(&id);
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

        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            while let Some(&(id, epoch)) = state.order.front() {
                // None marks a stale pair left behind by update()/remove().
                let is_due = match state.entries.get(&id) {
                    Some(entry) if entry.epoch == epoch => Some(entry.due <= now),
                    _ => None,
                };
                match is_due {
                    Some(true) => {
                        state.order.pop_front();
                        if let Some(entry) = state.entries.remove(&id) {
                            expired.push((id, entry.client));
                        }
                    }
                    Some(false) => break,
                    None => {
                        state.order.pop_front();
                    }
                }
            }
        }

        for (id, client) in expired {
            let Some(client) = client.upgrade() else {
                continue;
            };

            if client.unanswered_pings() > inner.queued_ping_limit {
                debug!("client {id} saturated its ping budget, closing");
                tokio::spawn(async move {
                    client
                        .close(CloseCode::POLICY_VIOLATION, "Exceeded unanswered PING limit")
                        .await;
                });
                continue;
            }

            client.ping().await;

            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let due = Instant::now() + inner.period;
            let epoch = state
                .entries
                .get(&id)
                .map(|entry| entry.epoch + 1)
                .unwrap_or(0);
            state.entries.insert(
                id,
                Entry {
                    due,
                    epoch,
                    client: Arc::downgrade(&client),
                },
            );
            state.order.push_back((id, epoch));
        }
    }
}
