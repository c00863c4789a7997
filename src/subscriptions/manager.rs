//! Subscription bus: per-service subscriber lists and event broadcast.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use super::types::{SubscriptionHandle, SubscriptionId, SubscriptionShared};
use crate::error::RegistryError;
use crate::types::{Event, EventKind, EventMask, Instance};

/// A subscriber-list entry: the sending side of one subscription.
struct Subscriber {
    id: SubscriptionId,
    kinds: EventMask,
    sender: Sender<Event>,
    shared: Arc<SubscriptionShared>,
}

/// Fans events out to the subscribers of each service.
///
/// Delivery never blocks: a subscriber whose channel cannot accept an event
/// is evicted on the spot with `SendBlocked` left sticky on its handle, so
/// one slow consumer cannot stall producers or its peers.
///
/// The bus's list lock is ordered after the registry's state lock; the
/// registry calls [`broadcast`](Self::broadcast) with its state lock held.
pub(crate) struct SubscriptionBus {
    /// Service name -> subscribers in attachment order.
    lists: Mutex<HashMap<String, Vec<Subscriber>>>,
    /// Counter for generating subscription ids.
    next_id: AtomicU64,
}

impl SubscriptionBus {
    pub(crate) fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a new subscription and deliver the captured snapshot, if any.
    ///
    /// `registry_guard` is the caller's state-lock guard (or `()` when no
    /// snapshot was captured). It is dropped only after the list lock is
    /// held and the subscriber entered, so a mutation serialized after the
    /// snapshot cannot broadcast before the snapshot below is delivered:
    /// the subscriber sees the snapshot followed by exactly the subsequent
    /// live events, without duplicates or gaps.
    ///
    /// Snapshot delivery follows the live-path discipline: non-blocking
    /// sends, eviction on a full buffer.
    pub(crate) fn subscribe<G>(
        bus: &Arc<SubscriptionBus>,
        service: &str,
        kinds: EventMask,
        capacity: usize,
        current: Vec<Arc<Instance>>,
        leader: Option<Arc<Instance>>,
        registry_guard: G,
    ) -> SubscriptionHandle {
        let (sender, receiver) = bounded(capacity);
        let shared = Arc::new(SubscriptionShared::default());
        let id = SubscriptionId(bus.next_id.fetch_add(1, Ordering::SeqCst));

        let mut lists = bus.lists.lock();
        drop(registry_guard);

        lists.entry(service.to_string()).or_default().push(Subscriber {
            id,
            kinds,
            sender: sender.clone(),
            shared: Arc::clone(&shared),
        });

        let mut pending = Vec::new();
        if kinds.intersects(EventMask::UP | EventMask::UPDATE) {
            pending.extend(
                current
                    .into_iter()
                    .map(|instance| (EventKind::Up, instance)),
            );
        }
        if kinds.contains(EventKind::Leader) {
            if let Some(instance) = leader {
                pending.push((EventKind::Leader, instance));
            }
        }

        for (kind, instance) in pending {
            let event = Event {
                service: service.to_string(),
                kind,
                instance,
            };
            if sender.try_send(event).is_err() {
                warn!(service, subscription = id.0, "snapshot overflow, evicting subscriber");
                shared.set_err(RegistryError::SendBlocked);
                shared.closed.store(true, Ordering::Release);
                Self::detach(&mut lists, service, id);
                break;
            }
        }

        drop(lists);
        SubscriptionHandle::new(id, service.to_string(), receiver, shared, Arc::clone(bus))
    }

    /// Deliver an event to every attached subscriber of its service whose
    /// mask includes the event's kind. Walks the list in attachment order.
    pub(crate) fn broadcast(&self, event: &Event) {
        let mut lists = self.lists.lock();
        let Some(list) = lists.get_mut(&event.service) else {
            return;
        };

        list.retain(|sub| {
            if !sub.kinds.contains(event.kind) {
                return true;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => {
                    trace!(service = %event.service, kind = %event.kind, subscription = sub.id.0, "event delivered");
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(service = %event.service, subscription = sub.id.0, "evicting slow subscriber");
                    sub.shared.set_err(RegistryError::SendBlocked);
                    sub.shared.closed.store(true, Ordering::Release);
                    false
                }
                Err(TrySendError::Disconnected(_)) => {
                    sub.shared.closed.store(true, Ordering::Release);
                    false
                }
            }
        });

        if list.is_empty() {
            lists.remove(&event.service);
        }
    }

    /// Detach a subscription. Idempotent; called from its handle.
    pub(crate) fn close(&self, service: &str, id: SubscriptionId, shared: &SubscriptionShared) {
        let mut lists = self.lists.lock();
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        Self::detach(&mut lists, service, id);
    }

    /// Number of live subscriptions across all services.
    pub(crate) fn subscription_count(&self) -> usize {
        self.lists.lock().values().map(Vec::len).sum()
    }

    fn detach(lists: &mut HashMap<String, Vec<Subscriber>>, service: &str, id: SubscriptionId) {
        if let Some(list) = lists.get_mut(service) {
            list.retain(|sub| sub.id != id);
            if list.is_empty() {
                lists.remove(service);
            }
        }
    }
}
