//! Per-federation state at one server node.

use std::collections::{BTreeMap, BTreeSet};

use accord_core::{
    ConnectHandle, FederateHandle, FederationHandle, HandleAllocator, ObjectClassHandle,
    ObjectInstanceHandle, RegionHandle, RtiError,
};
use accord_model::{FomModule, FomModuleSet, FomStringModule, TimeRegulatingState};

use crate::instance::ObjectInstance;
use crate::interaction_class::InteractionClassVector;
use crate::object_class::ObjectClassVector;
use crate::region::Region;
use crate::sync::Synchronization;
use crate::time::CommitRecord;

/// One joined federate as a node tracks it.
#[derive(Debug, Clone)]
pub struct Federate {
    pub handle: FederateHandle,
    pub name: String,
    pub federate_type: String,
    /// The connect the federate is reached through at this node.
    pub connect: Option<ConnectHandle>,
    pub resign_action: accord_model::ResignAction,
    pub resign_pending: bool,
    /// Object instance names this federate reserved and has not used yet.
    pub reserved_names: BTreeSet<String>,
}

/// The pairing of a connect with a federation: which federates are reached
/// through it and whether it points toward the root.
#[derive(Debug, Default, Clone)]
pub struct FederationConnect {
    pub is_parent: bool,
    pub federates: BTreeSet<FederateHandle>,
    /// Time-regulating federates reached through this connect.
    pub time_regulating: BTreeSet<FederateHandle>,
}

#[derive(Debug)]
pub struct Federation {
    pub handle: FederationHandle,
    pub name: String,
    pub logical_time_factory_name: String,
    pub module_set: FomModuleSet,
    pub object_classes: ObjectClassVector,
    pub interaction_classes: InteractionClassVector,

    pub instances: BTreeMap<ObjectInstanceHandle, ObjectInstance>,
    /// Name -> bound instance; `None` while only reserved.
    instance_names: BTreeMap<String, Option<ObjectInstanceHandle>>,
    pub instance_allocator: HandleAllocator<ObjectInstanceHandle>,

    pub federates: BTreeMap<FederateHandle, Federate>,
    federate_names: BTreeSet<String>,
    pub federate_allocator: HandleAllocator<FederateHandle>,

    pub connects: BTreeMap<ConnectHandle, FederationConnect>,
    pub sync_points: BTreeMap<String, Synchronization>,
    /// Committed bounds of every time-regulating federate.
    pub regulating: BTreeMap<FederateHandle, CommitRecord>,
    pub regions: BTreeMap<RegionHandle, Region>,
}

impl Federation {
    pub fn new(handle: FederationHandle, name: String, logical_time_factory_name: String) -> Self {
        Self {
            handle,
            name,
            logical_time_factory_name,
            module_set: FomModuleSet::new(),
            object_classes: ObjectClassVector::default(),
            interaction_classes: InteractionClassVector::default(),
            instances: BTreeMap::new(),
            instance_names: BTreeMap::new(),
            instance_allocator: HandleAllocator::new(),
            federates: BTreeMap::new(),
            federate_names: BTreeSet::new(),
            federate_allocator: HandleAllocator::new(),
            connects: BTreeMap::new(),
            sync_points: BTreeMap::new(),
            regulating: BTreeMap::new(),
            regions: BTreeMap::new(),
        }
    }

    // -- modules -----------------------------------------------------------

    /// Merge string modules all-or-nothing and grow the class trees with
    /// whatever the merge added. Returns the resolved modules it inserted.
    pub fn insert_string_modules(
        &mut self,
        modules: &[FomStringModule],
    ) -> Result<Vec<FomModule>, RtiError> {
        let handles = self.module_set.insert_string_modules(modules)?;
        let inserted: Vec<FomModule> = handles
            .iter()
            .filter_map(|handle| self.module_set.module(*handle).cloned())
            .collect();
        for module in &inserted {
            self.apply_module(module);
        }
        Ok(inserted)
    }

    /// Adopt modules resolved upstream.
    pub fn insert_resolved_modules(&mut self, modules: &[FomModule]) {
        self.module_set.insert_resolved_modules(modules);
        for module in modules {
            self.apply_module(module);
        }
    }

    fn apply_module(&mut self, module: &FomModule) {
        for class in &module.interaction_classes {
            self.interaction_classes.insert_fom_class(class);
        }
        for class in &module.object_classes {
            self.object_classes.insert_fom_class(class);
        }
    }

    // -- federates ---------------------------------------------------------

    pub fn is_federate_name_in_use(&self, name: &str) -> bool {
        self.federate_names.contains(name)
    }

    /// Insert a joined federate. `handle` is `None` at the root (allocate)
    /// and `Some` at tracking nodes. An already-known federate is re-homed
    /// onto `connect` instead, which happens when a join response overtakes
    /// the federation replica that already lists the joiner.
    pub fn insert_federate(
        &mut self,
        connect: ConnectHandle,
        handle: Option<FederateHandle>,
        name: Option<String>,
        federate_type: String,
    ) -> Result<FederateHandle, RtiError> {
        if let Some(handle) = handle {
            if self.federates.contains_key(&handle) {
                self.set_federate_connect(handle, connect);
                return Ok(handle);
            }
        }
        let handle = self.federate_allocator.get_or_take(handle)?;
        let name = match name {
            Some(name) => name,
            None => format!("HLAfederate{}", handle.raw()),
        };
        debug_assert!(!self.federate_names.contains(&name));

        self.federate_names.insert(name.clone());
        self.federates.insert(
            handle,
            Federate {
                handle,
                name,
                federate_type,
                connect: Some(connect),
                resign_action: Default::default(),
                resign_pending: false,
                reserved_names: BTreeSet::new(),
            },
        );
        self.connects
            .entry(connect)
            .or_default()
            .federates
            .insert(handle);
        Ok(handle)
    }

    pub fn erase_federate(&mut self, handle: FederateHandle) {
        let Some(federate) = self.federates.remove(&handle) else {
            return;
        };
        self.federate_names.remove(&federate.name);
        for name in &federate.reserved_names {
            if let Some(None) = self.instance_names.get(name) {
                self.instance_names.remove(name);
            }
        }
        if let Some(connect) = federate.connect {
            if let Some(federation_connect) = self.connects.get_mut(&connect) {
                federation_connect.federates.remove(&handle);
                federation_connect.time_regulating.remove(&handle);
            }
        }
        self.regulating.remove(&handle);
        self.federate_allocator.put(handle);
    }

    /// Move a federate to a different connect, keeping the per-connect
    /// federate and time-regulating sets coherent.
    pub fn set_federate_connect(&mut self, handle: FederateHandle, connect: ConnectHandle) {
        let Some(federate) = self.federates.get_mut(&handle) else {
            return;
        };
        let previous = federate.connect.replace(connect);
        let mut was_regulating = false;
        if let Some(previous) = previous {
            if let Some(federation_connect) = self.connects.get_mut(&previous) {
                federation_connect.federates.remove(&handle);
                was_regulating = federation_connect.time_regulating.remove(&handle);
            }
        }
        let entry = self.connects.entry(connect).or_default();
        entry.federates.insert(handle);
        if was_regulating || self.regulating.contains_key(&handle) {
            self.connects
                .entry(connect)
                .or_default()
                .time_regulating
                .insert(handle);
        }
    }

    pub fn federate_connect(&self, handle: FederateHandle) -> Option<ConnectHandle> {
        self.federates.get(&handle).and_then(|federate| federate.connect)
    }

    /// `(handle, name, type)` of every joined federate, for join replay.
    pub fn joined_federates(&self) -> Vec<(FederateHandle, String, String)> {
        self.federates
            .values()
            .map(|federate| {
                (
                    federate.handle,
                    federate.name.clone(),
                    federate.federate_type.clone(),
                )
            })
            .collect()
    }

    pub fn has_joined_federates(&self) -> bool {
        !self.federates.is_empty()
    }

    // -- time regulation ---------------------------------------------------

    pub fn insert_time_regulating(
        &mut self,
        federate: FederateHandle,
        connect: ConnectHandle,
        record: CommitRecord,
    ) {
        self.regulating.insert(federate, record);
        self.connects
            .entry(connect)
            .or_default()
            .time_regulating
            .insert(federate);
    }

    pub fn erase_time_regulating(&mut self, federate: FederateHandle) {
        self.regulating.remove(&federate);
        for connect in self.connects.values_mut() {
            connect.time_regulating.remove(&federate);
        }
    }

    pub fn time_regulating_states(&self) -> Vec<TimeRegulatingState> {
        self.regulating
            .iter()
            .map(|(federate, record)| record.replay_state(*federate))
            .collect()
    }

    // -- object instance names ---------------------------------------------

    pub fn is_object_name_in_use(&self, name: &str) -> bool {
        self.instance_names.contains_key(name)
    }

    /// Reserve `name` for `federate`. Returns false when the name is taken.
    pub fn reserve_object_name(&mut self, federate: FederateHandle, name: &str) -> bool {
        if self.instance_names.contains_key(name) {
            return false;
        }
        self.instance_names.insert(name.to_string(), None);
        if let Some(federate) = self.federates.get_mut(&federate) {
            federate.reserved_names.insert(name.to_string());
        }
        true
    }

    /// Hand back an unused reserved `(handle, name)` pair from the
    /// pre-allocated instance-handle pool.
    pub fn release_reserved_pair(&mut self, handle: ObjectInstanceHandle, name: &str) {
        if let Some(None) = self.instance_names.get(name) {
            self.instance_names.remove(name);
        }
        if !self.instances.contains_key(&handle) {
            self.instance_allocator.put(handle);
        }
    }

    pub fn release_object_name(&mut self, federate: FederateHandle, name: &str) {
        if let Some(None) = self.instance_names.get(name) {
            self.instance_names.remove(name);
        }
        if let Some(federate) = self.federates.get_mut(&federate) {
            federate.reserved_names.remove(name);
        }
    }

    // -- object instances --------------------------------------------------

    /// Track an object instance under `handle`/`name`, binding the name.
    /// The caller wires up class, ownership and references afterwards.
    pub fn insert_object_instance(
        &mut self,
        handle: ObjectInstanceHandle,
        name: &str,
    ) -> &mut ObjectInstance {
        self.instance_allocator.take(handle);
        self.instance_names.insert(name.to_string(), Some(handle));
        self.instances
            .entry(handle)
            .or_insert_with(|| ObjectInstance::new(handle, name.to_string()))
    }

    pub fn instance_by_name(&self, name: &str) -> Option<ObjectInstanceHandle> {
        self.instance_names.get(name).copied().flatten()
    }

    /// Forget an instance entirely: class list, name binding, allocator.
    pub fn erase_object_instance(&mut self, handle: ObjectInstanceHandle) {
        let Some(instance) = self.instances.remove(&handle) else {
            return;
        };
        if let Some(class) = instance.object_class {
            if let Some(class) = self.object_classes.get_mut(class) {
                class.instances.remove(&handle);
            }
        }
        self.instance_names.remove(&instance.name);
        self.instance_allocator.put(handle);
    }

    /// Bind an instance to its class and register it in the class's
    /// instance list.
    pub fn bind_instance_class(&mut self, handle: ObjectInstanceHandle, class: ObjectClassHandle) {
        let Some(class_data) = self.object_classes.get_mut(class) else {
            return;
        };
        class_data.instances.insert(handle);
        let class_data = self.object_classes.get(class).expect("just updated");
        if let Some(instance) = self.instances.get_mut(&handle) {
            instance.set_object_class(class_data);
        }
    }

    // -- connects ----------------------------------------------------------

    pub fn insert_connect(&mut self, connect: ConnectHandle, is_parent: bool) {
        let entry = self.connects.entry(connect).or_default();
        entry.is_parent = is_parent;
    }

    pub fn has_connect(&self, connect: ConnectHandle) -> bool {
        self.connects.contains_key(&connect)
    }

    pub fn all_connects(&self) -> Vec<ConnectHandle> {
        self.connects.keys().copied().collect()
    }

    /// Connects that participate in this federation, except `except`.
    pub fn connects_except(&self, except: ConnectHandle) -> Vec<ConnectHandle> {
        self.connects
            .keys()
            .copied()
            .filter(|connect| *connect != except)
            .collect()
    }

    /// Full cleanup when a connect disappears: pub/sub state, instance
    /// ownership and references. Federate teardown runs separately with the
    /// per-federate resign actions.
    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        for instance in self.instances.values_mut() {
            instance.remove_connect(connect);
        }
        self.object_classes.remove_connect(connect);
        self.interaction_classes.remove_connect(connect);
        self.connects.remove(&connect);
    }
}
