//! Subscription handle and shared per-subscription state.

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::manager::SubscriptionBus;
use crate::error::RegistryError;
use crate::types::Event;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// State shared between a subscriber-list entry and its handle. Outlives
/// the list entry so the sticky error stays readable after eviction.
#[derive(Default)]
pub(crate) struct SubscriptionShared {
    /// First fatal error, typically `SendBlocked` from eviction.
    err: OnceLock<RegistryError>,
    /// One-shot detach flag. Only flipped while the bus's list lock is held.
    pub(crate) closed: AtomicBool,
}

impl SubscriptionShared {
    pub(crate) fn set_err(&self, err: RegistryError) {
        let _ = self.err.set(err);
    }

    pub(crate) fn err(&self) -> Option<RegistryError> {
        self.err.get().cloned()
    }
}

/// Handle to a live subscription.
///
/// Owns the receiving side of the delivery channel. Dropping the handle
/// without calling [`close`](Self::close) is safe: the next broadcast that
/// matches the subscription finds the channel disconnected and reaps the
/// entry.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    service: String,
    receiver: Receiver<Event>,
    shared: Arc<SubscriptionShared>,
    bus: Arc<SubscriptionBus>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        service: String,
        receiver: Receiver<Event>,
        shared: Arc<SubscriptionShared>,
        bus: Arc<SubscriptionBus>,
    ) -> Self {
        Self {
            id,
            service,
            receiver,
            shared,
            bus,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<Event, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Sticky error: `SendBlocked` once the bus has evicted this
    /// subscription for not draining its channel.
    pub fn err(&self) -> Option<RegistryError> {
        self.shared.err()
    }

    /// Detach from the bus. Idempotent. Events already buffered remain
    /// readable from this handle; once drained, receives report
    /// disconnection.
    pub fn close(&self) {
        self.bus.close(&self.service, self.id, &self.shared);
    }
}
