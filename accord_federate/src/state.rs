//! The ambassador's mirror of federation state, rebuilt from the module list
//! replayed at join time and kept current by notifies.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use accord_core::{
    AttributeHandle, FederateHandle, FederationHandle, HandleKind, InteractionClassHandle,
    LocalRegionHandle, ObjectClassHandle, ObjectInstanceHandle, ParameterHandle, RtiError,
};
use accord_model::{FomModule, OrderType, SubscriptionType, TransportationType};

#[derive(Debug, Clone)]
pub struct AttributeMirror {
    pub handle: AttributeHandle,
    pub name: String,
    pub order_type: OrderType,
    pub transportation: TransportationType,
}

#[derive(Debug, Clone)]
pub struct ObjectClassMirror {
    pub handle: ObjectClassHandle,
    pub name: String,
    pub fq_name: Vec<String>,
    pub parent: Option<ObjectClassHandle>,
    /// One entry per attribute including inherited ones, indexed by handle.
    pub attributes: Vec<AttributeMirror>,
    pub published: BTreeSet<AttributeHandle>,
    pub subscribed: BTreeMap<AttributeHandle, SubscriptionType>,
}

impl ObjectClassMirror {
    pub fn attribute(&self, handle: AttributeHandle) -> Option<&AttributeMirror> {
        self.attributes.get(handle.index() as usize)
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&AttributeMirror> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn is_published(&self) -> bool {
        !self.published.is_empty()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
            .values()
            .any(|subscription| subscription.is_subscribed())
    }
}

#[derive(Debug, Clone)]
pub struct InteractionClassMirror {
    pub handle: InteractionClassHandle,
    pub name: String,
    pub fq_name: Vec<String>,
    pub parent: Option<InteractionClassHandle>,
    pub order_type: OrderType,
    pub transportation: TransportationType,
    /// Parameters declared at this class; inherited ones resolve by walking
    /// up the parent chain.
    pub parameters: Vec<(ParameterHandle, String)>,
    pub published: bool,
    pub subscribed: SubscriptionType,
}

/// One object instance this federate knows about.
#[derive(Debug, Clone)]
pub struct KnownInstance {
    pub handle: ObjectInstanceHandle,
    pub name: String,
    /// The registered (most derived) class.
    pub registered_class: ObjectClassHandle,
    /// The class the instance was discovered as: the most-derived subscribed
    /// ancestor-or-self of the registered class.
    pub known_class: ObjectClassHandle,
    pub owned_attributes: BTreeSet<AttributeHandle>,
}

/// Everything the ambassador tracks for one joined federation.
#[derive(Debug)]
pub struct FederationMirror {
    pub federation: FederationHandle,
    pub federation_name: String,
    pub federate: FederateHandle,
    pub federate_name: String,
    pub logical_time_factory_name: String,

    object_classes: Vec<Option<ObjectClassMirror>>,
    object_class_names: BTreeMap<Vec<String>, ObjectClassHandle>,
    interaction_classes: Vec<Option<InteractionClassMirror>>,
    interaction_class_names: BTreeMap<Vec<String>, InteractionClassHandle>,

    pub instances: BTreeMap<ObjectInstanceHandle, KnownInstance>,
    pub instances_by_name: BTreeMap<String, ObjectInstanceHandle>,
    /// Names the root confirmed as reserved for this federate.
    pub reserved_names: BTreeSet<String>,
    /// Pre-allocated `(handle, reserved name)` pairs for registration.
    pub handle_pool: VecDeque<(ObjectInstanceHandle, String)>,
    /// All joined federates: handle -> (name, type).
    pub joined_federates: BTreeMap<FederateHandle, (String, String)>,
    /// Synchronization labels announced to this federate and not yet
    /// synchronized.
    pub announced_labels: BTreeSet<String>,

    next_local_region: u32,
    pub regions: BTreeMap<LocalRegionHandle, BTreeSet<accord_core::DimensionHandle>>,
}

impl FederationMirror {
    pub fn new(
        federation: FederationHandle,
        federation_name: String,
        federate: FederateHandle,
        federate_name: String,
        logical_time_factory_name: String,
    ) -> Self {
        Self {
            federation,
            federation_name,
            federate,
            federate_name,
            logical_time_factory_name,
            object_classes: Vec::new(),
            object_class_names: BTreeMap::new(),
            interaction_classes: Vec::new(),
            interaction_class_names: BTreeMap::new(),
            instances: BTreeMap::new(),
            instances_by_name: BTreeMap::new(),
            reserved_names: BTreeSet::new(),
            handle_pool: VecDeque::new(),
            joined_federates: BTreeMap::new(),
            announced_labels: BTreeSet::new(),
            next_local_region: 0,
            regions: BTreeMap::new(),
        }
    }

    /// Merge a resolved module list into the class mirrors.
    pub fn insert_modules(&mut self, modules: &[FomModule]) {
        for module in modules {
            for class in &module.interaction_classes {
                let index = class.handle.index() as usize;
                if index < self.interaction_classes.len()
                    && self.interaction_classes[index].is_some()
                {
                    continue;
                }
                let mut fq_name = class
                    .parent
                    .and_then(|parent| self.interaction_class(parent))
                    .map(|parent| parent.fq_name.clone())
                    .unwrap_or_default();
                fq_name.push(class.name.clone());
                if self.interaction_classes.len() <= index {
                    self.interaction_classes.resize(index + 1, None);
                }
                self.interaction_class_names
                    .insert(fq_name.clone(), class.handle);
                self.interaction_classes[index] = Some(InteractionClassMirror {
                    handle: class.handle,
                    name: class.name.clone(),
                    fq_name,
                    parent: class.parent,
                    order_type: class.order_type,
                    transportation: class.transportation,
                    parameters: class
                        .parameters
                        .iter()
                        .map(|parameter| (parameter.handle, parameter.name.clone()))
                        .collect(),
                    published: false,
                    subscribed: SubscriptionType::Unsubscribed,
                });
            }

            for class in &module.object_classes {
                let index = class.handle.index() as usize;
                if index < self.object_classes.len() && self.object_classes[index].is_some() {
                    continue;
                }
                let (mut fq_name, mut attributes) = class
                    .parent
                    .and_then(|parent| self.object_class(parent))
                    .map(|parent| (parent.fq_name.clone(), parent.attributes.clone()))
                    .unwrap_or_default();
                fq_name.push(class.name.clone());
                for attribute in &class.attributes {
                    debug_assert_eq!(attribute.handle.index() as usize, attributes.len());
                    attributes.push(AttributeMirror {
                        handle: attribute.handle,
                        name: attribute.name.clone(),
                        order_type: attribute.order_type,
                        transportation: attribute.transportation,
                    });
                }
                if self.object_classes.len() <= index {
                    self.object_classes.resize(index + 1, None);
                }
                self.object_class_names.insert(fq_name.clone(), class.handle);
                self.object_classes[index] = Some(ObjectClassMirror {
                    handle: class.handle,
                    name: class.name.clone(),
                    fq_name,
                    parent: class.parent,
                    attributes,
                    published: BTreeSet::new(),
                    subscribed: BTreeMap::new(),
                });
            }
        }
    }

    // -- class lookup ------------------------------------------------------

    pub fn object_class(&self, handle: ObjectClassHandle) -> Option<&ObjectClassMirror> {
        self.object_classes
            .get(handle.index() as usize)
            .and_then(Option::as_ref)
    }

    pub fn object_class_mut(
        &mut self,
        handle: ObjectClassHandle,
    ) -> Option<&mut ObjectClassMirror> {
        self.object_classes
            .get_mut(handle.index() as usize)
            .and_then(Option::as_mut)
    }

    /// Look a class up by dotted fully-qualified name, falling back to the
    /// bare leaf name.
    pub fn object_class_by_name(&self, name: &str) -> Option<&ObjectClassMirror> {
        let path: Vec<String> = name.split('.').map(str::to_string).collect();
        if let Some(handle) = self.object_class_names.get(&path) {
            return self.object_class(*handle);
        }
        self.object_classes
            .iter()
            .flatten()
            .find(|class| class.name == name)
    }

    pub fn interaction_class(
        &self,
        handle: InteractionClassHandle,
    ) -> Option<&InteractionClassMirror> {
        self.interaction_classes
            .get(handle.index() as usize)
            .and_then(Option::as_ref)
    }

    pub fn interaction_class_mut(
        &mut self,
        handle: InteractionClassHandle,
    ) -> Option<&mut InteractionClassMirror> {
        self.interaction_classes
            .get_mut(handle.index() as usize)
            .and_then(Option::as_mut)
    }

    pub fn interaction_class_by_name(&self, name: &str) -> Option<&InteractionClassMirror> {
        let path: Vec<String> = name.split('.').map(str::to_string).collect();
        if let Some(handle) = self.interaction_class_names.get(&path) {
            return self.interaction_class(*handle);
        }
        self.interaction_classes
            .iter()
            .flatten()
            .find(|class| class.name == name)
    }

    /// The most-derived subscribed class on the path from `class` to the
    /// root; how a discovered instance becomes known.
    pub fn known_object_class(&self, class: ObjectClassHandle) -> Option<ObjectClassHandle> {
        let mut current = Some(class);
        while let Some(handle) = current {
            let mirror = self.object_class(handle)?;
            if mirror.is_subscribed() {
                return Some(handle);
            }
            current = mirror.parent;
        }
        None
    }

    /// The most-derived subscribed interaction class on the path from
    /// `class` to the root.
    pub fn known_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Option<InteractionClassHandle> {
        let mut current = Some(class);
        while let Some(handle) = current {
            let mirror = self.interaction_class(handle)?;
            if mirror.subscribed.is_subscribed() {
                return Some(handle);
            }
            current = mirror.parent;
        }
        None
    }

    // -- instances ---------------------------------------------------------

    pub fn insert_instance(&mut self, instance: KnownInstance) {
        self.instances_by_name
            .insert(instance.name.clone(), instance.handle);
        self.instances.insert(instance.handle, instance);
    }

    pub fn remove_instance(&mut self, handle: ObjectInstanceHandle) -> Option<KnownInstance> {
        let instance = self.instances.remove(&handle)?;
        self.instances_by_name.remove(&instance.name);
        Some(instance)
    }

    pub fn instance(&self, handle: ObjectInstanceHandle) -> Option<&KnownInstance> {
        self.instances.get(&handle)
    }

    pub fn instance_by_name(&self, name: &str) -> Option<&KnownInstance> {
        self.instances_by_name
            .get(name)
            .and_then(|handle| self.instances.get(handle))
    }

    // -- regions -----------------------------------------------------------

    pub fn allocate_region(
        &mut self,
        dimensions: BTreeSet<accord_core::DimensionHandle>,
    ) -> Result<LocalRegionHandle, RtiError> {
        if dimensions.is_empty() {
            return Err(RtiError::InvalidRegion);
        }
        let handle = LocalRegionHandle::from_raw(self.next_local_region);
        self.next_local_region += 1;
        self.regions.insert(handle, dimensions);
        Ok(handle)
    }
}
