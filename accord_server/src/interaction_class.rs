//! The interaction-class tree of one federation.
//!
//! Analogous to the object-class tree, but publication and subscription live
//! on the class itself and there are no instances to track.

use std::collections::BTreeSet;

use accord_core::{ConnectHandle, DimensionHandle, HandleKind, InteractionClassHandle};
use accord_model::{FomInteractionClass, FomParameter, OrderType, TransportationType};

use crate::pubsub::PublishSubscribe;

#[derive(Debug, Clone)]
pub struct InteractionClass {
    pub handle: InteractionClassHandle,
    pub name: String,
    pub parent: Option<InteractionClassHandle>,
    pub children: Vec<InteractionClassHandle>,
    pub order_type: OrderType,
    pub transportation: TransportationType,
    pub dimensions: BTreeSet<DimensionHandle>,
    /// Parameters declared at this class; inherited ones live at the
    /// ancestors and are resolved by walking up.
    pub parameters: Vec<FomParameter>,
    pub pubsub: PublishSubscribe,
}

#[derive(Debug, Default, Clone)]
pub struct InteractionClassVector {
    classes: Vec<InteractionClass>,
}

impl InteractionClassVector {
    pub fn get(&self, handle: InteractionClassHandle) -> Option<&InteractionClass> {
        self.classes.get(handle.index() as usize)
    }

    pub fn get_mut(&mut self, handle: InteractionClassHandle) -> Option<&mut InteractionClass> {
        self.classes.get_mut(handle.index() as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InteractionClass> {
        self.classes.iter()
    }

    pub fn insert_fom_class(&mut self, fom_class: &FomInteractionClass) {
        let index = fom_class.handle.index() as usize;
        if index < self.classes.len() {
            return;
        }
        debug_assert_eq!(index, self.classes.len());

        let mut pubsub = PublishSubscribe::default();
        if let Some(parent) = fom_class.parent.and_then(|parent| self.get(parent)) {
            pubsub.seed_cumulative_from(&parent.pubsub);
        }

        self.classes.push(InteractionClass {
            handle: fom_class.handle,
            name: fom_class.name.clone(),
            parent: fom_class.parent,
            children: Vec::new(),
            order_type: fom_class.order_type,
            transportation: fom_class.transportation,
            dimensions: fom_class.dimensions.clone(),
            parameters: fom_class.parameters.clone(),
            pubsub,
        });

        if let Some(parent) = fom_class.parent {
            if let Some(parent_class) = self.get_mut(parent) {
                parent_class.children.push(fom_class.handle);
            }
        }
    }

    /// Ancestors of `handle`, closest first, not including the class itself.
    pub fn ancestors(&self, handle: InteractionClassHandle) -> Vec<InteractionClassHandle> {
        let mut ancestors = Vec::new();
        let mut current = self.get(handle).and_then(|class| class.parent);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.get(parent).and_then(|class| class.parent);
        }
        ancestors
    }

    /// Recompute the cumulative subscribed set for `(class, connect)` and
    /// push the change down the subtree. Subscribing to a child keeps all
    /// ancestors forwarding matching interactions.
    pub fn update_cumulative_subscription(
        &mut self,
        class: InteractionClassHandle,
        connect: ConnectHandle,
    ) {
        let parent_subscribed = self
            .get(class)
            .and_then(|c| c.parent)
            .and_then(|parent| self.get(parent))
            .map(|parent| parent.pubsub.cumulative_subscribed().contains(&connect))
            .unwrap_or(false);
        self.update_cumulative(class, connect, parent_subscribed);
    }

    fn update_cumulative(
        &mut self,
        class: InteractionClassHandle,
        connect: ConnectHandle,
        parent_subscribed: bool,
    ) {
        let Some(class_data) = self.get_mut(class) else {
            return;
        };
        let subscribe =
            parent_subscribed || class_data.pubsub.subscription(connect).is_subscribed();
        if !class_data
            .pubsub
            .update_cumulative_subscription(connect, subscribe)
        {
            return;
        }
        for child in class_data.children.clone() {
            self.update_cumulative(child, connect, subscribe);
        }
    }

    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        for class in &mut self.classes {
            class.pubsub.remove_connect(connect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_model::SubscriptionType;

    fn fom_class(handle: u32, name: &str, parent: Option<u32>) -> FomInteractionClass {
        FomInteractionClass {
            handle: InteractionClassHandle::from_raw(handle),
            name: name.into(),
            parent: parent.map(InteractionClassHandle::from_raw),
            order_type: OrderType::Timestamp,
            transportation: TransportationType::Reliable,
            dimensions: Default::default(),
            parameters: Vec::new(),
        }
    }

    #[test]
    fn subscribing_a_child_reaches_its_subtree_only() {
        let mut classes = InteractionClassVector::default();
        classes.insert_fom_class(&fom_class(0, "HLAinteractionRoot", None));
        classes.insert_fom_class(&fom_class(1, "Ping", Some(0)));
        classes.insert_fom_class(&fom_class(2, "FastPing", Some(1)));

        let connect = ConnectHandle::from_raw(9);
        let ping = InteractionClassHandle::from_raw(1);
        classes
            .get_mut(ping)
            .unwrap()
            .pubsub
            .set_subscription(connect, SubscriptionType::SubscribedActive);
        classes.update_cumulative_subscription(ping, connect);

        assert!(!classes
            .get(InteractionClassHandle::from_raw(0))
            .unwrap()
            .pubsub
            .cumulative_subscribed()
            .contains(&connect));
        for class in [1u32, 2] {
            assert!(classes
                .get(InteractionClassHandle::from_raw(class))
                .unwrap()
                .pubsub
                .cumulative_subscribed()
                .contains(&connect));
        }
    }
}
