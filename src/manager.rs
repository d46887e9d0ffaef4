// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! The scheduler shared between submitters and decode workers.
//!
//! All shared mutable state — two pending queues, the in-flight set, and the
//! client registry — sits behind one mutex; a condvar wakes workers sleeping
//! in [`Manager::next`]. None of the lock-protected operations perform I/O
//! or decoding.
//!
//! Completed results are not handed to clients on the worker thread.
//! Workers push onto an internal channel via [`Manager::finish`], and the
//! owning context drains it with [`Manager::poll_deliveries`], which is the
//! seam that lets a UI-owning thread safely mutate its own state from the
//! callback. The registry check happens at drain time, so a client stopped
//! after its decode completed still receives nothing.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, Weak};

use crate::client::{ClientId, ImageClient};
use crate::request::{ImageRequest, ImageResult, RequestKey};

/// Scope of a [`Manager::stop`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopScope {
    /// Cancel everything the client has outstanding, including withholding
    /// delivery of decodes already in flight.
    All,
    /// Cancel only non-priority work, leaving an urgent request the client
    /// also has outstanding untouched.
    NonPriorityOnly,
}

struct ClientEntry {
    client: Weak<dyn ImageClient>,
    /// Queued plus live (non-cancelled) in-flight requests. The entry is
    /// dropped at zero, which keeps the registry an exact answer to "is this
    /// client still owed anything?". Cancelled work is released at stop
    /// time, never at finish.
    outstanding: usize,
}

struct LoadingJob {
    client: ClientId,
    priority: bool,
    cancelled: bool,
}

#[derive(Default)]
struct State {
    priority_queue: VecDeque<ImageRequest>,
    normal_queue: VecDeque<ImageRequest>,
    loading: HashMap<RequestKey, LoadingJob>,
    clients: HashMap<ClientId, ClientEntry>,
    exit_requested: bool,
}

impl State {
    /// Drop a queued request with the given key, if any. Returns whether one
    /// was removed.
    fn remove_queued(&mut self, key: &RequestKey) -> bool {
        let before = self.priority_queue.len() + self.normal_queue.len();
        self.priority_queue.retain(|r| r.key() != *key);
        self.normal_queue.retain(|r| r.key() != *key);
        before != self.priority_queue.len() + self.normal_queue.len()
    }

    /// One request of `client` has met its fate (delivered, discarded, or
    /// cancelled); drop the registry entry once nothing is outstanding.
    fn release_one(&mut self, client: ClientId) {
        if let Some(entry) = self.clients.get_mut(&client) {
            entry.outstanding = entry.outstanding.saturating_sub(1);
            if entry.outstanding == 0 {
                self.clients.remove(&client);
            }
        }
    }

    /// Pop the next request a worker should decode: priority queue first,
    /// FIFO within each tier, skipping requests nobody wants anymore.
    fn pop_ready(&mut self) -> Option<ImageRequest> {
        loop {
            let request = self
                .priority_queue
                .pop_front()
                .or_else(|| self.normal_queue.pop_front())?;
            let key = request.key();
            let wanted = match self.clients.get(&key.client) {
                None => false,
                Some(entry) => match entry.client.upgrade() {
                    None => false,
                    Some(client) => client.still_needed(&request),
                },
            };
            if wanted {
                self.loading.insert(
                    key,
                    LoadingJob {
                        client: request.client.id(),
                        priority: request.priority,
                        cancelled: false,
                    },
                );
                return Some(request);
            }
            // Stale: nobody is listening. Normal flow control, not an error.
            self.release_one(key.client);
        }
    }
}

pub struct Manager {
    state: Mutex<State>,
    sleepers: Condvar,
    delivery_tx: Sender<(ImageRequest, ImageResult)>,
    delivery_rx: Mutex<Receiver<(ImageRequest, ImageResult)>>,
}

impl Manager {
    pub fn new() -> Self {
        let (delivery_tx, delivery_rx) = mpsc::channel();
        Self {
            state: Mutex::new(State::default()),
            sleepers: Condvar::new(),
            delivery_tx,
            delivery_rx: Mutex::new(delivery_rx),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("manager state lock poisoned")
    }

    /// Enqueue a request and wake a worker. Returns immediately; the result
    /// arrives asynchronously through [`Manager::poll_deliveries`].
    ///
    /// A request whose key is already being decoded is dropped — the
    /// in-flight job will satisfy the caller. A request whose key is merely
    /// queued replaces the queued one, so the latest submission wins.
    pub fn submit(&self, request: ImageRequest) {
        {
            let mut state = self.lock_state();
            if state.exit_requested {
                return;
            }
            let key = request.key();
            if let Some(job) = state.loading.get_mut(&key) {
                if !job.cancelled {
                    // The in-flight job will satisfy the caller.
                    return;
                }
                // A decode cancelled by stop() is still running for this
                // key. Adopt it instead of racing a second decode of the
                // same image: mark it live again and re-register the client.
                job.cancelled = false;
                job.priority = request.priority;
                let entry = state
                    .clients
                    .entry(key.client)
                    .or_insert_with(|| ClientEntry {
                        client: request.client.weak(),
                        outstanding: 0,
                    });
                entry.client = request.client.weak();
                entry.outstanding += 1;
                return;
            }
            let replaced = state.remove_queued(&key);
            let entry = state
                .clients
                .entry(key.client)
                .or_insert_with(|| ClientEntry {
                    client: request.client.weak(),
                    outstanding: 0,
                });
            // Refresh the weak handle; a re-created client may reuse a
            // handle it cloned earlier.
            entry.client = request.client.weak();
            if !replaced {
                entry.outstanding += 1;
            }
            if request.priority {
                state.priority_queue.push_back(request);
            } else {
                state.normal_queue.push_back(request);
            }
        }
        self.sleepers.notify_one();
    }

    /// Worker-only. Blocks until a request is available and wanted, marking
    /// it in flight. Returns `None` once exit has been requested.
    pub fn next(&self) -> Option<ImageRequest> {
        let mut state = self.lock_state();
        loop {
            if state.exit_requested {
                return None;
            }
            if let Some(request) = state.pop_ready() {
                return Some(request);
            }
            state = self
                .sleepers
                .wait(state)
                .expect("manager state lock poisoned");
        }
    }

    /// Cancel a client's outstanding work.
    ///
    /// `StopScope::All` also marks in-flight decodes cancelled: the worker
    /// cannot be interrupted mid-decode, but the finished result is dropped
    /// instead of delivered.
    pub fn stop(&self, client: ClientId, scope: StopScope) {
        let mut state = self.lock_state();
        match scope {
            StopScope::All => {
                state.priority_queue.retain(|r| r.client.id() != client);
                state.normal_queue.retain(|r| r.client.id() != client);
                for job in state.loading.values_mut() {
                    if job.client == client {
                        job.cancelled = true;
                    }
                }
                state.clients.remove(&client);
            }
            StopScope::NonPriorityOnly => {
                let before = state.normal_queue.len();
                state.normal_queue.retain(|r| r.client.id() != client);
                let mut released = before - state.normal_queue.len();
                for job in state.loading.values_mut() {
                    if job.client == client && !job.priority && !job.cancelled {
                        job.cancelled = true;
                        released += 1;
                    }
                }
                for _ in 0..released {
                    state.release_one(client);
                }
            }
        }
    }

    /// Worker-only. Record completion of an in-flight request. A cancelled
    /// job is dropped here; anything else is queued for delivery.
    pub fn finish(&self, request: ImageRequest, result: ImageResult) {
        let key = request.key();
        {
            let mut state = self.lock_state();
            // Cancelled jobs were already released at stop time; dropping
            // the result is all that is left to do.
            match state.loading.remove(&key) {
                Some(job) if !job.cancelled => {}
                _ => return,
            }
        }
        let _ = self.delivery_tx.send((request, result));
    }

    /// Drain completed results and invoke client callbacks. Call this from
    /// the single context that is allowed to run client code. Returns the
    /// number of callbacks invoked.
    pub fn poll_deliveries(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = {
                let rx = self.delivery_rx.lock().expect("delivery lock poisoned");
                rx.try_recv()
            };
            let Ok((request, result)) = next else {
                break;
            };
            let client = {
                let mut state = self.lock_state();
                let id = request.client.id();
                match state.clients.get(&id) {
                    // Stopped since the decode finished: discard silently.
                    None => None,
                    Some(entry) => {
                        let weak = entry.client.clone();
                        state.release_one(id);
                        weak.upgrade()
                    }
                }
            };
            // Callback runs outside the lock.
            if let Some(client) = client {
                client.image_loaded(result);
                delivered += 1;
            }
        }
        delivered
    }

    /// Ask all workers to exit once their current job is done.
    pub fn request_exit(&self) {
        self.lock_state().exit_requested = true;
        self.sleepers.notify_all();
    }

    /// Number of requests currently being decoded.
    pub fn active_count(&self) -> usize {
        self.lock_state().loading.len()
    }

    /// Number of requests queued but not yet started.
    pub fn pending_count(&self) -> usize {
        let state = self.lock_state();
        state.priority_queue.len() + state.normal_queue.len()
    }

    #[cfg(test)]
    fn try_next(&self) -> Option<ImageRequest> {
        self.lock_state().pop_ready()
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
