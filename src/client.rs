// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! The client protocol: how decoded images find their way back.
//!
//! A requester implements [`ImageClient`] and wraps itself in an `Arc`. The
//! manager only ever holds a [`ClientHandle`] — an opaque id plus a weak
//! reference — so a client that has been dropped can never receive a
//! callback, and liveness can be tested without touching client state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::request::{ImageRequest, ImageResult};

/// Callback contract for requesters.
pub trait ImageClient: Send + Sync {
    /// Invoked exactly once per submitted request that was not cancelled, on
    /// whichever thread drains the manager's delivery queue — never on the
    /// decode worker itself.
    fn image_loaded(&self, result: ImageResult);

    /// Consulted before a queued request is handed to a worker. Returning
    /// false withdraws interest (e.g. a thumbnail cell scrolled out of view)
    /// without an explicit stop call. Must be cheap and must not call back
    /// into the manager.
    fn still_needed(&self, _request: &ImageRequest) -> bool {
        true
    }
}

/// Opaque, process-unique client identity. Used as the registry key and as
/// part of the request de-duplication key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A client's identity paired with a weak reference to it.
///
/// Create one handle per client and clone it into each request; the id stays
/// stable across clones, which is what makes bulk cancellation by client
/// possible.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    client: Weak<dyn ImageClient>,
}

impl ClientHandle {
    pub fn new<C: ImageClient + 'static>(client: &Arc<C>) -> Self {
        let weak = Arc::downgrade(client);
        let weak: Weak<dyn ImageClient> = weak;
        Self {
            id: ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)),
            client: weak,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Upgrade to a strong reference, or `None` if the client is gone.
    pub fn upgrade(&self) -> Option<Arc<dyn ImageClient>> {
        self.client.upgrade()
    }

    pub(crate) fn weak(&self) -> Weak<dyn ImageClient> {
        self.client.clone()
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("alive", &(self.client.strong_count() > 0))
            .finish()
    }
}
