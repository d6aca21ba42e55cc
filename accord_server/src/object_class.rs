//! The object-class tree of one federation.
//!
//! Classes live in a vector keyed by handle; parent and child links are
//! handles, which matches the wire format where only handles travel. Every
//! class carries one [`ObjectClassAttribute`] per attribute *including
//! inherited ones*, so attribute handles index directly into the vector.

use std::collections::BTreeMap;

use accord_core::{AttributeHandle, ConnectHandle, HandleKind, ObjectClassHandle, ObjectInstanceHandle};
use accord_model::{FomAttribute, FomObjectClass, OrderType, TransportationType};

use crate::instance::ObjectInstance;
use crate::pubsub::PublishSubscribe;

#[derive(Debug, Clone)]
pub struct ObjectClassAttribute {
    pub handle: AttributeHandle,
    pub name: String,
    pub order_type: OrderType,
    pub transportation: TransportationType,
    pub dimensions: std::collections::BTreeSet<accord_core::DimensionHandle>,
    pub pubsub: PublishSubscribe,
}

impl ObjectClassAttribute {
    fn from_fom(attribute: &FomAttribute) -> Self {
        Self {
            handle: attribute.handle,
            name: attribute.name.clone(),
            order_type: attribute.order_type,
            transportation: attribute.transportation,
            dimensions: attribute.dimensions.clone(),
            pubsub: PublishSubscribe::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectClass {
    pub handle: ObjectClassHandle,
    pub name: String,
    pub parent: Option<ObjectClassHandle>,
    pub children: Vec<ObjectClassHandle>,
    /// One entry per attribute including inherited ones, indexed by handle.
    pub attributes: Vec<ObjectClassAttribute>,
    /// Instances of exactly this class.
    pub instances: std::collections::BTreeSet<ObjectInstanceHandle>,
}

impl ObjectClass {
    pub fn attribute(&self, handle: AttributeHandle) -> Option<&ObjectClassAttribute> {
        self.attributes.get(handle.index() as usize)
    }

    pub fn attribute_mut(&mut self, handle: AttributeHandle) -> Option<&mut ObjectClassAttribute> {
        self.attributes.get_mut(handle.index() as usize)
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&ObjectClassAttribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        for attribute in &mut self.attributes {
            attribute.pubsub.remove_connect(connect);
        }
    }
}

/// The arena of object classes, indexed by handle.
#[derive(Debug, Default, Clone)]
pub struct ObjectClassVector {
    classes: Vec<ObjectClass>,
}

impl ObjectClassVector {
    pub fn get(&self, handle: ObjectClassHandle) -> Option<&ObjectClass> {
        self.classes.get(handle.index() as usize)
    }

    pub fn get_mut(&mut self, handle: ObjectClassHandle) -> Option<&mut ObjectClass> {
        self.classes.get_mut(handle.index() as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectClass> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Insert a class resolved from a FOM module. Redeclarations of an
    /// already known class are no-ops; the module set has verified they
    /// match.
    pub fn insert_fom_class(&mut self, fom_class: &FomObjectClass) {
        let index = fom_class.handle.index() as usize;
        if index < self.classes.len() {
            return;
        }
        debug_assert_eq!(index, self.classes.len());

        // Inherited attributes come first; a fresh subclass starts with its
        // parent's cumulative subscriber interest.
        let mut attributes = Vec::new();
        if let Some(parent) = fom_class.parent {
            if let Some(parent_class) = self.get(parent) {
                for parent_attribute in &parent_class.attributes {
                    let mut attribute = parent_attribute.clone();
                    attribute.pubsub = PublishSubscribe::default();
                    attribute.pubsub.seed_cumulative_from(&parent_attribute.pubsub);
                    attributes.push(attribute);
                }
            }
        }
        for attribute in &fom_class.attributes {
            debug_assert_eq!(attribute.handle.index() as usize, attributes.len());
            attributes.push(ObjectClassAttribute::from_fom(attribute));
        }

        self.classes.push(ObjectClass {
            handle: fom_class.handle,
            name: fom_class.name.clone(),
            parent: fom_class.parent,
            children: Vec::new(),
            attributes,
            instances: Default::default(),
        });

        if let Some(parent) = fom_class.parent {
            if let Some(parent_class) = self.get_mut(parent) {
                parent_class.children.push(fom_class.handle);
            }
        }
    }

    /// Ancestors of `handle`, closest first, not including the class itself.
    pub fn ancestors(&self, handle: ObjectClassHandle) -> Vec<ObjectClassHandle> {
        let mut ancestors = Vec::new();
        let mut current = self.get(handle).and_then(|class| class.parent);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.get(parent).and_then(|class| class.parent);
        }
        ancestors
    }

    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        for class in &mut self.classes {
            class.remove_connect(connect);
        }
    }
}

/// Side effects of a cumulative-subscription recursion, to be turned into
/// messages by the node.
#[derive(Debug, Default)]
pub struct SubscriptionEffects {
    /// Instances the subscribing connect has to discover.
    pub discovered: Vec<ObjectInstanceHandle>,
    /// `(instance, attribute)` pairs that came into scope for the connect.
    pub in_scope: Vec<(ObjectInstanceHandle, AttributeHandle)>,
    /// `(instance, attribute)` pairs that went out of scope for the connect.
    pub out_of_scope: Vec<(ObjectInstanceHandle, AttributeHandle)>,
    /// `(owner connect, instance, attribute)` whose receiver set became
    /// non-empty.
    pub updates_on: Vec<(ConnectHandle, ObjectInstanceHandle, AttributeHandle)>,
    /// `(owner connect, instance, attribute)` whose receiver set drained.
    pub updates_off: Vec<(ConnectHandle, ObjectInstanceHandle, AttributeHandle)>,
}

/// Recompute the cumulative subscribed set for `(class, attribute, connect)`
/// and propagate the change down the subtree, adjusting the receiving sets of
/// every affected instance.
///
/// Since subscriptions may end in different depths for different attributes,
/// this runs per attribute.
pub fn update_cumulative_subscription(
    classes: &mut ObjectClassVector,
    instances: &mut BTreeMap<ObjectInstanceHandle, ObjectInstance>,
    class: ObjectClassHandle,
    attribute: AttributeHandle,
    connect: ConnectHandle,
    effects: &mut SubscriptionEffects,
) {
    let parent_subscribed = classes
        .get(class)
        .and_then(|c| c.parent)
        .and_then(|parent| classes.get(parent))
        .and_then(|parent| parent.attribute(attribute))
        .map(|a| a.pubsub.cumulative_subscribed().contains(&connect))
        .unwrap_or(false);

    update_cumulative(
        classes,
        instances,
        class,
        attribute,
        connect,
        parent_subscribed,
        effects,
    );
}

fn update_cumulative(
    classes: &mut ObjectClassVector,
    instances: &mut BTreeMap<ObjectInstanceHandle, ObjectInstance>,
    class: ObjectClassHandle,
    attribute: AttributeHandle,
    connect: ConnectHandle,
    parent_subscribed: bool,
    effects: &mut SubscriptionEffects,
) {
    let Some(class_data) = classes.get_mut(class) else {
        return;
    };
    let Some(class_attribute) = class_data.attribute_mut(attribute) else {
        return;
    };

    let subscribe =
        parent_subscribed || class_attribute.pubsub.subscription(connect).is_subscribed();
    if !class_attribute
        .pubsub
        .update_cumulative_subscription(connect, subscribe)
    {
        return;
    }

    let children = class_data.children.clone();
    let class_instances: Vec<_> = class_data.instances.iter().copied().collect();

    for child in children {
        update_cumulative(
            classes, instances, child, attribute, connect, subscribe, effects,
        );
    }

    for instance_handle in class_instances {
        let Some(instance) = instances.get_mut(&instance_handle) else {
            continue;
        };
        let Some(object_attribute) = instance.attribute_mut(attribute) else {
            continue;
        };

        // The owner never receives its own attribute.
        if object_attribute.owner == Some(connect) {
            continue;
        }

        if subscribe {
            if !object_attribute.receiving.insert(connect) {
                continue;
            }
            if attribute == AttributeHandle::PRIVILEGE_TO_DELETE {
                // The connect has to learn of the instance itself.
                effects.discovered.push(instance_handle);
            } else {
                effects.in_scope.push((instance_handle, attribute));
            }
            if object_attribute.receiving.len() == 1 {
                if let Some(owner) = object_attribute.owner {
                    effects.updates_on.push((owner, instance_handle, attribute));
                }
            }
        } else {
            // Attribute-0 receiving sets never shrink: once a connect knows
            // an instance it keeps receiving lifecycle messages, avoiding
            // races with in-flight data.
            if attribute == AttributeHandle::PRIVILEGE_TO_DELETE {
                continue;
            }
            if !object_attribute.receiving.remove(&connect) {
                continue;
            }
            effects.out_of_scope.push((instance_handle, attribute));
            if object_attribute.receiving.is_empty() {
                if let Some(owner) = object_attribute.owner {
                    effects
                        .updates_off
                        .push((owner, instance_handle, attribute));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_model::SubscriptionType;

    fn fom_class(
        handle: u32,
        name: &str,
        parent: Option<u32>,
        attributes: &[(u32, &str)],
    ) -> FomObjectClass {
        FomObjectClass {
            handle: ObjectClassHandle::from_raw(handle),
            name: name.into(),
            parent: parent.map(ObjectClassHandle::from_raw),
            attributes: attributes
                .iter()
                .map(|(h, n)| FomAttribute {
                    handle: AttributeHandle::from_raw(*h),
                    name: (*n).to_string(),
                    order_type: OrderType::Timestamp,
                    transportation: TransportationType::Reliable,
                    dimensions: Default::default(),
                })
                .collect(),
        }
    }

    /// root(privilege) <- Foo(x) <- Bar(z)
    fn tree() -> ObjectClassVector {
        let mut classes = ObjectClassVector::default();
        classes.insert_fom_class(&fom_class(0, "HLAobjectRoot", None, &[(0, "privilege")]));
        classes.insert_fom_class(&fom_class(1, "Foo", Some(0), &[(1, "x")]));
        classes.insert_fom_class(&fom_class(2, "Bar", Some(1), &[(2, "z")]));
        classes
    }

    #[test]
    fn inherited_attributes_are_materialized() {
        let classes = tree();
        let bar = classes.get(ObjectClassHandle::from_raw(2)).unwrap();
        assert_eq!(bar.attributes.len(), 3);
        assert_eq!(bar.attributes[1].name, "x");
        assert_eq!(
            classes.ancestors(ObjectClassHandle::from_raw(2)),
            vec![ObjectClassHandle::from_raw(1), ObjectClassHandle::from_raw(0)]
        );
    }

    #[test]
    fn cumulative_subscription_propagates_to_subclasses() {
        let mut classes = tree();
        let mut instances = BTreeMap::new();
        let connect = ConnectHandle::from_raw(7);
        let foo = ObjectClassHandle::from_raw(1);
        let x = AttributeHandle::from_raw(1);

        classes
            .get_mut(foo)
            .unwrap()
            .attribute_mut(x)
            .unwrap()
            .pubsub
            .set_subscription(connect, SubscriptionType::SubscribedActive);
        let mut effects = SubscriptionEffects::default();
        update_cumulative_subscription(&mut classes, &mut instances, foo, x, connect, &mut effects);

        // The cumulative set holds at Foo and at Bar, not at the root.
        for class in [1u32, 2] {
            assert!(classes
                .get(ObjectClassHandle::from_raw(class))
                .unwrap()
                .attribute(x)
                .unwrap()
                .pubsub
                .cumulative_subscribed()
                .contains(&connect));
        }
        assert!(!classes
            .get(ObjectClassHandle::from_raw(0))
            .unwrap()
            .attribute(AttributeHandle::from_raw(0))
            .unwrap()
            .pubsub
            .cumulative_subscribed()
            .contains(&connect));

        // Unsubscribe rolls the cumulative state back.
        classes
            .get_mut(foo)
            .unwrap()
            .attribute_mut(x)
            .unwrap()
            .pubsub
            .set_subscription(connect, SubscriptionType::Unsubscribed);
        let mut effects = SubscriptionEffects::default();
        update_cumulative_subscription(&mut classes, &mut instances, foo, x, connect, &mut effects);
        for class in [1u32, 2] {
            assert!(!classes
                .get(ObjectClassHandle::from_raw(class))
                .unwrap()
                .attribute(x)
                .unwrap()
                .pubsub
                .cumulative_subscribed()
                .contains(&connect));
        }
    }

    #[test]
    fn subclass_created_after_subscription_inherits_interest() {
        let mut classes = tree();
        let mut instances = BTreeMap::new();
        let connect = ConnectHandle::from_raw(3);
        let foo = ObjectClassHandle::from_raw(1);
        let x = AttributeHandle::from_raw(1);

        classes
            .get_mut(foo)
            .unwrap()
            .attribute_mut(x)
            .unwrap()
            .pubsub
            .set_subscription(connect, SubscriptionType::SubscribedActive);
        let mut effects = SubscriptionEffects::default();
        update_cumulative_subscription(&mut classes, &mut instances, foo, x, connect, &mut effects);

        // A module joined later adds Baz below Foo.
        classes.insert_fom_class(&fom_class(3, "Baz", Some(1), &[(2, "w")]));
        assert!(classes
            .get(ObjectClassHandle::from_raw(3))
            .unwrap()
            .attribute(x)
            .unwrap()
            .pubsub
            .cumulative_subscribed()
            .contains(&connect));
    }
}
