// src/events/broadcaster.rs

//! Fan-out of `JobEvent`s to independent subscribers.
//!
//! Each subscriber owns a bounded queue. `publish` never waits: when a queue
//! is full its oldest event is dropped and the subscriber's missed counter
//! goes up; the next `recv` reports `Missed(n)` before the events that
//! survived. A slot is removed as soon as its handle is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::Stream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::event::JobEvent;
use crate::job::JobId;

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(JobEvent),
    /// This many events were dropped because the subscriber fell behind.
    Missed(u64),
}

struct SlotQueue {
    events: VecDeque<JobEvent>,
    missed: u64,
    closed: bool,
}

struct Slot {
    filter: Option<JobId>,
    queue: Mutex<SlotQueue>,
    notify: Notify,
}

impl Slot {
    fn new(filter: Option<JobId>, initial: VecDeque<JobEvent>) -> Self {
        Self {
            filter,
            queue: Mutex::new(SlotQueue {
                events: initial,
                missed: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn wants(&self, event: &JobEvent) -> bool {
        match (self.filter, event.job_id) {
            (Some(wanted), Some(id)) => wanted == id,
            _ => true,
        }
    }

    fn queue(&self) -> MutexGuard<'_, SlotQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.queue().closed = true;
        self.notify.notify_one();
    }
}

struct State {
    next_id: u64,
    slots: HashMap<u64, Arc<Slot>>,
    history: VecDeque<JobEvent>,
    last_activity: Instant,
    closed: bool,
}

struct Shared {
    capacity: usize,
    history_limit: usize,
    state: Mutex<State>,
    overflow_total: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    shared: Arc<Shared>,
}

impl EventBroadcaster {
    /// `capacity` bounds each subscriber queue, `history_limit` the replay
    /// buffer of recent non-heartbeat events.
    pub fn new(capacity: usize, history_limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                history_limit,
                state: Mutex::new(State {
                    next_id: 0,
                    slots: HashMap::new(),
                    history: VecDeque::new(),
                    last_activity: Instant::now(),
                    closed: false,
                }),
                overflow_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn publish(&self, event: JobEvent) {
        let slots: Vec<Arc<Slot>> = {
            let mut state = self.shared.state();
            if state.closed {
                return;
            }
            state.last_activity = Instant::now();
            if !event.is_heartbeat() && self.shared.history_limit > 0 {
                if state.history.len() == self.shared.history_limit {
                    state.history.pop_front();
                }
                state.history.push_back(event.clone());
            }
            state
                .slots
                .values()
                .filter(|slot| slot.wants(&event))
                .cloned()
                .collect()
        };

        for slot in slots {
            {
                let mut queue = slot.queue();
                if queue.closed {
                    continue;
                }
                if queue.events.len() >= self.shared.capacity {
                    queue.events.pop_front();
                    queue.missed += 1;
                    self.shared.overflow_total.fetch_add(1, Ordering::Relaxed);
                }
                queue.events.push_back(event.clone());
            }
            slot.notify.notify_one();
        }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        self.attach(None, false)
    }

    /// Subscribe to the events of one job (heartbeats included).
    pub fn subscribe_job(&self, job_id: JobId) -> EventSubscription {
        self.attach(Some(job_id), false)
    }

    /// Subscribe and first receive the retained history, oldest first.
    pub fn subscribe_with_history(&self) -> EventSubscription {
        self.attach(None, true)
    }

    fn attach(&self, filter: Option<JobId>, replay: bool) -> EventSubscription {
        let mut state = self.shared.state();
        let id = state.next_id;
        state.next_id += 1;

        let mut initial = VecDeque::new();
        if replay {
            let skip = state.history.len().saturating_sub(self.shared.capacity);
            initial.extend(state.history.iter().skip(skip).cloned());
        }

        let slot = Arc::new(Slot::new(filter, initial));
        if state.closed {
            slot.queue().closed = true;
        } else {
            state.slots.insert(id, Arc::clone(&slot));
        }
        debug!(subscriber = id, ?filter, "event subscriber attached");

        EventSubscription {
            id,
            slot,
            shared: Arc::clone(&self.shared),
        }
    }

    /// End every subscription and refuse further publishes.
    pub fn close(&self) {
        let slots: Vec<Arc<Slot>> = {
            let mut state = self.shared.state();
            state.closed = true;
            state.slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            slot.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state().slots.len()
    }

    /// Events dropped across all subscribers since construction.
    pub fn overflow_total(&self) -> u64 {
        self.shared.overflow_total.load(Ordering::Relaxed)
    }

    /// The retained history, oldest first.
    pub fn recent(&self) -> Vec<JobEvent> {
        self.shared.state().history.iter().cloned().collect()
    }

    fn idle_for(&self) -> Duration {
        self.shared.state().last_activity.elapsed()
    }

    /// Publish a heartbeat whenever nothing was published for `interval`.
    pub fn spawn_heartbeat(&self, interval: Duration, stop: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let mut wait = interval.saturating_sub(this.idle_for());
                if wait.is_zero() {
                    this.publish(JobEvent::heartbeat());
                    wait = interval;
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            debug!("heartbeat task stopped");
        })
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct EventSubscription {
    id: u64,
    slot: Arc<Slot>,
    shared: Arc<Shared>,
}

impl EventSubscription {
    /// Wait for the next delivery. `None` once the broadcaster is closed and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.take() {
                return delivery;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing is
    /// queued right now (or the subscription is closed and drained).
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.take().flatten()
    }

    /// `Some(delivery)` when there is something to return, `None` when the
    /// caller has to wait.
    fn take(&self) -> Option<Option<Delivery>> {
        let mut queue = self.slot.queue();
        if queue.missed > 0 {
            let n = std::mem::take(&mut queue.missed);
            return Some(Some(Delivery::Missed(n)));
        }
        if let Some(event) = queue.events.pop_front() {
            return Some(Some(Delivery::Event(event)));
        }
        if queue.closed {
            return Some(None);
        }
        None
    }

    /// Missed count not yet reported through `recv`.
    pub fn pending_missed(&self) -> u64 {
        self.slot.queue().missed
    }

    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|d| (d, sub))
        })
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.shared.state().slots.remove(&self.id);
    }
}
