//! Object instances as a server node sees them.

use std::collections::BTreeSet;

use accord_core::{AttributeHandle, ConnectHandle, HandleKind, ObjectClassHandle, ObjectInstanceHandle};

use crate::object_class::ObjectClass;

/// Ownership and fan-out state of one instance attribute. Because of
/// attribute ownership it is always clear where an update stems from, so a
/// plain set of receiving connects suffices.
#[derive(Debug, Clone)]
pub struct ObjectAttribute {
    pub handle: AttributeHandle,
    pub owner: Option<ConnectHandle>,
    pub receiving: BTreeSet<ConnectHandle>,
}

impl ObjectAttribute {
    /// Hand the attribute to `connect`. The owner never appears in its own
    /// receiving set.
    pub fn set_owner(&mut self, connect: Option<ConnectHandle>) {
        if let Some(connect) = connect {
            self.receiving.remove(&connect);
        }
        self.owner = connect;
    }

    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        self.receiving.remove(&connect);
        if self.owner == Some(connect) {
            self.owner = None;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectInstance {
    pub handle: ObjectInstanceHandle,
    pub name: String,
    pub object_class: Option<ObjectClassHandle>,
    /// One entry per class attribute including inherited ones.
    attributes: Vec<ObjectAttribute>,
    /// Connects that know this instance; each holds one reference.
    references: BTreeSet<ConnectHandle>,
}

impl ObjectInstance {
    pub fn new(handle: ObjectInstanceHandle, name: String) -> Self {
        Self {
            handle,
            name,
            object_class: None,
            attributes: Vec::new(),
            references: BTreeSet::new(),
        }
    }

    /// Bind the instance to its class, materializing one instance attribute
    /// per class attribute. Receiving sets start out as the class attribute's
    /// cumulative subscribed set; the registering owner is taken out again
    /// via [`ObjectAttribute::set_owner`].
    pub fn set_object_class(&mut self, class: &ObjectClass) {
        if self.object_class.is_some() {
            debug_assert_eq!(self.object_class, Some(class.handle));
            return;
        }
        self.object_class = Some(class.handle);
        self.attributes = class
            .attributes
            .iter()
            .map(|class_attribute| ObjectAttribute {
                handle: class_attribute.handle,
                owner: None,
                receiving: class_attribute.pubsub.cumulative_subscribed().clone(),
            })
            .collect();
    }

    pub fn attribute(&self, handle: AttributeHandle) -> Option<&ObjectAttribute> {
        self.attributes.get(handle.index() as usize)
    }

    pub fn attribute_mut(&mut self, handle: AttributeHandle) -> Option<&mut ObjectAttribute> {
        self.attributes.get_mut(handle.index() as usize)
    }

    pub fn attributes(&self) -> &[ObjectAttribute] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut [ObjectAttribute] {
        &mut self.attributes
    }

    pub fn privilege_to_delete(&self) -> Option<&ObjectAttribute> {
        self.attribute(AttributeHandle::PRIVILEGE_TO_DELETE)
    }

    /// The connect that owns the instance, via the privilege-to-delete
    /// attribute.
    pub fn owner_connect(&self) -> Option<ConnectHandle> {
        self.privilege_to_delete().and_then(|attribute| attribute.owner)
    }

    /// Record that `connect` knows this instance. Returns true when this is
    /// a new reference.
    pub fn reference(&mut self, connect: ConnectHandle) -> bool {
        self.references.insert(connect)
    }

    /// Drop `connect`'s reference. Returns true when no connect references
    /// the instance anymore, at which point the node may forget it.
    pub fn unreference(&mut self, connect: ConnectHandle) -> bool {
        self.references.remove(&connect);
        self.references.is_empty()
    }

    pub fn is_referenced_by(&self, connect: ConnectHandle) -> bool {
        self.references.contains(&connect)
    }

    pub fn references(&self) -> &BTreeSet<ConnectHandle> {
        &self.references
    }

    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        self.references.remove(&connect);
        for attribute in &mut self.attributes {
            attribute.remove_connect(connect);
        }
    }
}
