//! Authentication-state observers
//!
//! Backends publish every identity transition to an [`AuthStateHub`]. Each
//! registered observer is called once per transition, in the order the
//! transitions were published.
//!
//! Deliveries go through a single queue drained by whichever caller finds
//! it idle, so observers may publish, subscribe or unsubscribe from inside a
//! callback. Such nested calls are delivered after the current callback
//! returns.

use crate::firebase::identity::Identity;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Observer = Arc<dyn Fn(Option<&Identity>) + Send + Sync>;

struct Registered {
    id: u64,
    /// Sequence number of the state delivered on subscription
    since: u64,
    observer: Observer,
}

enum Delivery {
    /// A published transition, for every observer registered before it
    Transition { seq: u64, state: Option<Identity> },
    /// The state a new observer starts from
    Initial { id: u64, state: Option<Identity> },
}

#[derive(Default)]
struct HubState {
    current: Option<Identity>,
    seq: u64,
    observers: Vec<Registered>,
    next_id: u64,
    pending: VecDeque<Delivery>,
    dispatching: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the queue if an observer panics mid-dispatch.
struct DispatchGuard<'a> {
    state: &'a Mutex<HubState>,
    armed: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.state).dispatching = false;
        }
    }
}

#[derive(Default)]
pub struct AuthStateHub {
    state: Arc<Mutex<HubState>>,
}

impl AuthStateHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Identity> {
        lock(&self.state).current.clone()
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }

    /// Records `next` as the current state and notifies every observer.
    pub fn publish(&self, next: Option<Identity>) {
        let mut state = lock(&self.state);
        state.seq += 1;
        state.current = next.clone();
        let seq = state.seq;
        state.pending.push_back(Delivery::Transition { seq, state: next });
        self.drain(state);
    }

    /// Registers `observer` and calls it with the current state. The call
    /// happens before this returns unless another delivery is in progress,
    /// in which case it is queued behind it.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(Option<&Identity>) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        let since = state.seq;
        state.observers.push(Registered {
            id,
            since,
            observer: Arc::new(observer),
        });
        let current = state.current.clone();
        state.pending.push_back(Delivery::Initial { id, state: current });
        self.drain(state);

        Subscription {
            id,
            hub: Arc::downgrade(&self.state),
        }
    }

    /// Delivers queued notifications, unless some caller already is.
    fn drain<'a>(&'a self, mut state: MutexGuard<'a, HubState>) {
        if state.dispatching {
            return;
        }
        state.dispatching = true;
        let mut guard = DispatchGuard {
            state: &self.state,
            armed: true,
        };

        loop {
            let Some(delivery) = state.pending.pop_front() else {
                state.dispatching = false;
                guard.armed = false;
                return;
            };
            let (targets, identity): (Vec<Observer>, Option<Identity>) = match delivery {
                Delivery::Transition { seq, state: identity } => (
                    state
                        .observers
                        .iter()
                        .filter(|r| r.since < seq)
                        .map(|r| r.observer.clone())
                        .collect(),
                    identity,
                ),
                Delivery::Initial { id, state: identity } => (
                    state
                        .observers
                        .iter()
                        .filter(|r| r.id == id)
                        .map(|r| r.observer.clone())
                        .collect(),
                    identity,
                ),
            };
            drop(state);

            for observer in targets {
                observer(identity.as_ref());
            }
            state = lock(&self.state);
        }
    }
}

impl std::fmt::Debug for AuthStateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("AuthStateHub")
            .field("current", &state.current)
            .field("observers", &state.observers.len())
            .finish()
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the observer"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<Mutex<HubState>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.hub.upgrade() {
            let mut hub = lock(&state);
            let removed = hub
                .observers
                .iter()
                .position(|r| r.id == self.id)
                .map(|i| hub.observers.remove(i));
            // The observer may own subscriptions of its own.
            drop(hub);
            drop(removed);
        }
    }
}
