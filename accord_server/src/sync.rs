//! Synchronization-point state, tracked at the root.

use std::collections::{BTreeMap, BTreeSet};

use accord_core::{FederateHandle, Payload};

/// One registered synchronization label: the set of federates it waits for
/// and the per-federate success flags collected so far.
#[derive(Debug, Clone)]
pub struct Synchronization {
    pub tag: Payload,
    /// Labels registered without an explicit federate set also capture
    /// federates that join while the point is pending.
    pub add_joining_federates: bool,
    participating: BTreeSet<FederateHandle>,
    waiting: BTreeSet<FederateHandle>,
    achieved: BTreeMap<FederateHandle, bool>,
}

impl Synchronization {
    /// An empty `federates` set means every currently joined federate
    /// participates.
    pub fn new(
        tag: Payload,
        federates: &[FederateHandle],
        joined: impl Iterator<Item = FederateHandle>,
    ) -> Self {
        let participating: BTreeSet<_> = if federates.is_empty() {
            joined.collect()
        } else {
            federates.iter().copied().collect()
        };
        Self {
            tag,
            add_joining_federates: federates.is_empty(),
            waiting: participating.clone(),
            participating,
            achieved: BTreeMap::new(),
        }
    }

    pub fn participating(&self) -> &BTreeSet<FederateHandle> {
        &self.participating
    }

    pub fn is_waiting_for(&self, federate: FederateHandle) -> bool {
        self.waiting.contains(&federate)
    }

    /// A federate joined while the point is pending.
    pub fn insert_joining(&mut self, federate: FederateHandle) {
        if self.add_joining_federates && self.participating.insert(federate) {
            self.waiting.insert(federate);
        }
    }

    /// A participant reported the point achieved. Returns true when the
    /// barrier is complete.
    pub fn achieved(&mut self, federate: FederateHandle, successful: bool) -> bool {
        if self.waiting.remove(&federate) {
            self.achieved.insert(federate, successful);
        }
        self.waiting.is_empty()
    }

    /// A participant resigned. Returns true when that completed the barrier.
    pub fn remove_federate(&mut self, federate: FederateHandle) -> bool {
        self.participating.remove(&federate);
        self.achieved.remove(&federate);
        let removed = self.waiting.remove(&federate);
        removed && self.waiting.is_empty()
    }

    /// The per-federate success map reported with `FederationSynchronized`.
    pub fn success_map(&self) -> Vec<(FederateHandle, bool)> {
        self.achieved.iter().map(|(federate, ok)| (*federate, *ok)).collect()
    }
}
