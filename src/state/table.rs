//! Per-service instance table and leader bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Instance;

/// Live instances of a single service plus leader state.
///
/// Purely serial: the registry holds its lock exclusively around every
/// mutating call, so the table itself carries no synchronization.
///
/// Leader invariants: `leader_id` is empty iff `leader_index` is zero; a
/// non-empty `leader_id` is always a key of `instances`; the leader is the
/// instance with the smallest index (the oldest surviving registration).
#[derive(Default)]
pub(crate) struct ServiceTable {
    /// Instance id -> instance.
    instances: HashMap<String, Arc<Instance>>,

    leader_id: String,
    /// Greater than zero when a leader is set, zero when unset.
    leader_index: u64,
    /// True while a leader change has not yet been broadcast.
    notify_leader: bool,
}

impl ServiceTable {
    /// Insert or overwrite an instance, returning the previous mapping.
    pub(crate) fn add_instance(&mut self, inst: Arc<Instance>) -> Option<Arc<Instance>> {
        let old = self.instances.insert(inst.id.clone(), Arc::clone(&inst));
        self.maybe_set_leader(&inst);
        old
    }

    /// Remove an instance by id, returning it. Removing the leader clears
    /// the leader fields and re-elects among the survivors.
    pub(crate) fn remove_instance(&mut self, id: &str) -> Option<Arc<Instance>> {
        let inst = self.instances.remove(id)?;
        if inst.id == self.leader_id {
            self.leader_id.clear();
            self.leader_index = 0;
            self.maybe_pick_leader();
        }
        Some(inst)
    }

    /// Replace the instance set wholesale, returning the previous set.
    /// A leader absent from the new set loses leadership.
    pub(crate) fn set_instances(
        &mut self,
        instances: HashMap<String, Arc<Instance>>,
    ) -> HashMap<String, Arc<Instance>> {
        if !instances.contains_key(&self.leader_id) {
            self.leader_id.clear();
            self.leader_index = 0;
        }
        let old = std::mem::replace(&mut self.instances, instances);
        self.maybe_pick_leader();
        old
    }

    pub(crate) fn leader(&self) -> Option<Arc<Instance>> {
        self.instances.get(&self.leader_id).cloned()
    }

    /// Take the pending leader notification. Returns the instance to
    /// announce if a change is pending and a leader exists; the transient
    /// flag is cleared either way. This is the only observation point of
    /// the flag.
    pub(crate) fn broadcast_leader(&mut self) -> Option<Arc<Instance>> {
        if !self.notify_leader {
            return None;
        }
        self.notify_leader = false;
        self.leader()
    }

    pub(crate) fn instances(&self) -> &HashMap<String, Arc<Instance>> {
        &self.instances
    }

    /// Snapshot copy of the instance set.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Instance>> {
        self.instances.values().cloned().collect()
    }

    /// Adopt `inst` as leader when there is none or when it predates the
    /// current one. The notify flag is raised only when the leader identity
    /// actually changes.
    fn maybe_set_leader(&mut self, inst: &Arc<Instance>) {
        if self.leader_index == 0 || inst.index < self.leader_index {
            self.notify_leader = self.notify_leader || inst.id != self.leader_id;
            self.leader_id = inst.id.clone();
            self.leader_index = inst.index;
        }
    }

    /// Re-run the election over every instance. The minimum-index rule is
    /// order independent, so a single pass over the candidate with the
    /// smallest index is equivalent to visiting all of them.
    fn maybe_pick_leader(&mut self) {
        let candidate = self
            .instances
            .values()
            .filter(|inst| self.leader_index == 0 || inst.index < self.leader_index)
            .min_by_key(|inst| inst.index)
            .cloned();
        if let Some(inst) = candidate {
            self.maybe_set_leader(&inst);
        }
    }
}
