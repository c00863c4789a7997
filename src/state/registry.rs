//! The authoritative registry: service map, mutation orchestration, and
//! event fan-out.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::state::table::ServiceTable;
use crate::subscriptions::{SubscriptionBus, SubscriptionHandle};
use crate::types::{Event, EventKind, EventMask, Instance};

fn change_kind(existing: bool) -> EventKind {
    if existing {
        EventKind::Update
    } else {
        EventKind::Up
    }
}

/// Thread-safe registry of services, their instances, and their leaders.
///
/// Every mutation holds the service map exclusively for its full duration,
/// including the hand-off of derived events to the subscription bus, so
/// concurrent readers observe either the pre- or post-mutation state and
/// subscribers observe events in mutation order. Lock order is always the
/// service map before the bus's subscriber lists.
pub struct Registry {
    /// Service name -> table.
    services: RwLock<HashMap<String, ServiceTable>>,

    /// Per-service subscriber lists.
    bus: Arc<SubscriptionBus>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            bus: Arc::new(SubscriptionBus::new()),
        }
    }

    /// Create the named service if absent. Idempotent, emits nothing.
    pub fn add_service(&self, name: &str) {
        let mut services = self.services.write();
        services.entry(name.to_string()).or_default();
    }

    /// Delete the named service, emitting `down` for each registered
    /// instance. Unknown names are a no-op. No `leader` event is emitted on
    /// teardown; consumers infer loss of leadership from the leader's
    /// `down`.
    pub fn remove_service(&self, name: &str) {
        let mut services = self.services.write();
        let Some(table) = services.remove(name) else {
            return;
        };
        debug!(service = name, "removing service");
        for inst in table.instances().values() {
            self.bus.broadcast(&Event {
                service: name.to_string(),
                kind: EventKind::Down,
                instance: Arc::clone(inst),
            });
        }
    }

    /// Register or refresh an instance, auto-creating the service.
    ///
    /// Emits `up` for a new id, `update` for a changed descriptor, nothing
    /// for an identical re-registration, then announces any pending leader
    /// change.
    pub fn add_instance(&self, name: &str, inst: Instance) {
        let inst = Arc::new(inst);
        let mut services = self.services.write();

        let table = services.entry(name.to_string()).or_default();
        let old = table.add_instance(Arc::clone(&inst));

        let changed = match &old {
            None => true,
            Some(prev) => !inst.equal(prev),
        };
        if changed {
            debug!(service = name, id = %inst.id, index = inst.index, "instance registered");
            self.bus.broadcast(&Event {
                service: name.to_string(),
                kind: change_kind(old.is_some()),
                instance: Arc::clone(&inst),
            });
        }
        self.broadcast_leader(&mut services, name);
    }

    /// Deregister an instance by id, emitting `down` and announcing any
    /// pending leader change. Unknown service or instance is a no-op: a
    /// removal may legitimately race with a pending update.
    pub fn remove_instance(&self, name: &str, id: &str) {
        let mut services = self.services.write();
        let Some(table) = services.get_mut(name) else {
            return;
        };
        let Some(inst) = table.remove_instance(id) else {
            return;
        };

        debug!(service = name, id = id, "instance removed");
        self.bus.broadcast(&Event {
            service: name.to_string(),
            kind: EventKind::Down,
            instance: inst,
        });
        self.broadcast_leader(&mut services, name);
    }

    /// Replace the full instance set of a service.
    ///
    /// `None` deletes the service entry without emitting `down` events;
    /// callers using this form own the teardown notification story.
    /// Otherwise the new set is diffed against the old: `up` for new ids,
    /// `update` for changed descriptors, `down` for dropped ids, and a
    /// trailing leader announcement when the new set is non-empty.
    pub fn set_service(&self, name: &str, instances: Option<Vec<Instance>>) {
        let mut services = self.services.write();

        let Some(list) = instances else {
            debug!(service = name, "service unset");
            services.remove(name);
            return;
        };

        let new_instances: Vec<Arc<Instance>> = list.into_iter().map(Arc::new).collect();
        let new_map: HashMap<String, Arc<Instance>> = new_instances
            .iter()
            .map(|inst| (inst.id.clone(), Arc::clone(inst)))
            .collect();

        let existed = services.contains_key(name);
        let table = services.entry(name.to_string()).or_default();
        let old_map = table.set_instances(new_map);
        debug!(service = name, count = new_instances.len(), existed, "service set");

        if !existed {
            for inst in &new_instances {
                self.bus.broadcast(&Event {
                    service: name.to_string(),
                    kind: EventKind::Up,
                    instance: Arc::clone(inst),
                });
            }
            self.broadcast_leader(&mut services, name);
            return;
        }

        for inst in &new_instances {
            let prev = old_map.get(&inst.id);
            if let Some(prev) = prev {
                if inst.equal(prev) {
                    continue;
                }
            }
            self.bus.broadcast(&Event {
                service: name.to_string(),
                kind: change_kind(prev.is_some()),
                instance: Arc::clone(inst),
            });
        }

        let new_ids: HashSet<&str> = new_instances.iter().map(|inst| inst.id.as_str()).collect();
        for (id, inst) in &old_map {
            if !new_ids.contains(id.as_str()) {
                self.bus.broadcast(&Event {
                    service: name.to_string(),
                    kind: EventKind::Down,
                    instance: Arc::clone(inst),
                });
            }
        }

        if !new_instances.is_empty() {
            self.broadcast_leader(&mut services, name);
        }
    }

    /// Snapshot copy of a service's instances; empty when unknown.
    pub fn get(&self, name: &str) -> Vec<Arc<Instance>> {
        let services = self.services.read();
        services
            .get(name)
            .map(|table| table.snapshot())
            .unwrap_or_default()
    }

    /// The current leader of a service, if any.
    pub fn get_leader(&self, name: &str) -> Option<Arc<Instance>> {
        self.services.read().get(name).and_then(|table| table.leader())
    }

    /// Snapshot of all known service names.
    pub fn list_services(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Attach a subscriber to a service, filtered by `kinds`, with a
    /// delivery buffer of `capacity` events.
    ///
    /// With `send_current` (and a mask intersecting up/update/leader), the
    /// current contents are delivered before any live event: one `up` per
    /// instance if the mask covers up or update, then one `leader` if it
    /// covers leader and a leader exists. The subscriber list is entered
    /// before the state lock used for the snapshot is released, so the
    /// snapshot plus the live stream reproduce exactly the sequence of
    /// states the registry passes through.
    ///
    /// Snapshot delivery is non-blocking like the live path: a buffer too
    /// small for the snapshot evicts the subscription at attach, leaving
    /// `SendBlocked` sticky on the handle.
    pub fn subscribe(
        &self,
        service: &str,
        send_current: bool,
        kinds: EventMask,
        capacity: usize,
    ) -> SubscriptionHandle {
        let send_current = send_current
            && kinds.intersects(EventMask::UP | EventMask::UPDATE | EventMask::LEADER);
        if !send_current {
            return SubscriptionBus::subscribe(
                &self.bus,
                service,
                kinds,
                capacity,
                Vec::new(),
                None,
                (),
            );
        }

        let services = self.services.read();
        let (current, leader) = services
            .get(service)
            .map(|table| (table.snapshot(), table.leader()))
            .unwrap_or_default();
        // The bus drops this read guard only after the subscriber list is
        // locked and entered: no mutation can slip between snapshot capture
        // and attachment.
        SubscriptionBus::subscribe(&self.bus, service, kinds, capacity, current, leader, services)
    }

    /// Number of live subscriptions across all services.
    pub fn subscription_count(&self) -> usize {
        self.bus.subscription_count()
    }

    fn broadcast_leader(&self, services: &mut HashMap<String, ServiceTable>, name: &str) {
        let Some(table) = services.get_mut(name) else {
            return;
        };
        if let Some(leader) = table.broadcast_leader() {
            debug!(service = name, id = %leader.id, "leader elected");
            self.bus.broadcast(&Event {
                service: name.to_string(),
                kind: EventKind::Leader,
                instance: leader,
            });
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
