//! Publication and subscription state per publishable entity.

use std::collections::BTreeSet;

use accord_core::ConnectHandle;
use accord_model::{PublicationType, SubscriptionType};

/// What a change to a connect set means for the rest of the server node.
///
/// The decision rule is what keeps the tree from broadcasting redundant
/// notifications: only the 0↔1 and 1↔2 transitions are observable outside
/// this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Tell every connect except the one that caused the change.
    Broadcast,
    /// Tell exactly this connect.
    Send(ConnectHandle),
    /// Nothing observable changed.
    None,
}

/// A connect set that reports the propagation decision for every mutation.
#[derive(Debug, Default, Clone)]
pub struct BroadcastConnectSet {
    connects: BTreeSet<ConnectHandle>,
}

impl BroadcastConnectSet {
    /// Mark `connect` as a member. On the 0→1 transition everyone else needs
    /// to hear about it; on the 1→2 transition only the previously exclusive
    /// member does not yet know that some other connect cares.
    pub fn insert(&mut self, connect: ConnectHandle) -> Propagation {
        let initial_size = self.connects.len();
        let previous_exclusive = self.connects.iter().next().copied();

        if !self.connects.insert(connect) {
            return Propagation::None;
        }

        match initial_size {
            0 => Propagation::Broadcast,
            1 => Propagation::Send(previous_exclusive.expect("size was 1")),
            _ => Propagation::None,
        }
    }

    /// Remove `connect`. On the 1→0 transition everyone else needs to hear
    /// about it; on the 2→1 transition the remaining member does.
    pub fn erase(&mut self, connect: ConnectHandle) -> Propagation {
        if !self.connects.remove(&connect) {
            return Propagation::None;
        }

        match self.connects.len() {
            0 => Propagation::Broadcast,
            1 => Propagation::Send(*self.connects.iter().next().expect("size is 1")),
            _ => Propagation::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connects.is_empty()
    }

    pub fn contains(&self, connect: ConnectHandle) -> bool {
        self.connects.contains(&connect)
    }

    /// Whether any connect other than `connect` is a member.
    pub fn contains_more_than(&self, connect: ConnectHandle) -> bool {
        match self.connects.len() {
            0 => false,
            1 => !self.connects.contains(&connect),
            _ => true,
        }
    }

    pub fn connects(&self) -> &BTreeSet<ConnectHandle> {
        &self.connects
    }
}

/// Per-connect publication and subscription state of one publishable entity
/// (a class attribute or an interaction class), plus the cumulative
/// subscribed set maintained across the class hierarchy.
#[derive(Debug, Default, Clone)]
pub struct PublishSubscribe {
    published: BroadcastConnectSet,
    subscribed: BroadcastConnectSet,
    active_subscribed: BroadcastConnectSet,
    /// Connects subscribed here or at any ancestor class.
    cumulative_subscribed: BTreeSet<ConnectHandle>,
}

impl PublishSubscribe {
    pub fn set_publication(
        &mut self,
        connect: ConnectHandle,
        publication: PublicationType,
    ) -> Propagation {
        match publication {
            PublicationType::Published => self.published.insert(connect),
            PublicationType::Unpublished => self.published.erase(connect),
        }
    }

    pub fn publication(&self, connect: ConnectHandle) -> PublicationType {
        if self.published.contains(connect) {
            PublicationType::Published
        } else {
            PublicationType::Unpublished
        }
    }

    pub fn any_publication(&self) -> PublicationType {
        if self.published.is_empty() {
            PublicationType::Unpublished
        } else {
            PublicationType::Published
        }
    }

    pub fn published_connects(&self) -> &BTreeSet<ConnectHandle> {
        self.published.connects()
    }

    // Only passive subscriptions drive propagation; the active flag rides
    // along in a second set.
    pub fn set_subscription(
        &mut self,
        connect: ConnectHandle,
        subscription: SubscriptionType,
    ) -> Propagation {
        match subscription {
            SubscriptionType::SubscribedActive => {
                self.active_subscribed.insert(connect);
                self.subscribed.insert(connect)
            }
            SubscriptionType::SubscribedPassive => {
                self.active_subscribed.erase(connect);
                self.subscribed.insert(connect)
            }
            SubscriptionType::Unsubscribed => {
                self.active_subscribed.erase(connect);
                self.subscribed.erase(connect)
            }
        }
    }

    pub fn subscription(&self, connect: ConnectHandle) -> SubscriptionType {
        if self.active_subscribed.contains(connect) {
            SubscriptionType::SubscribedActive
        } else if self.subscribed.contains(connect) {
            SubscriptionType::SubscribedPassive
        } else {
            SubscriptionType::Unsubscribed
        }
    }

    /// The subscription state of every connect except the given one.
    pub fn subscription_to_connect(&self, connect: ConnectHandle) -> SubscriptionType {
        if self.active_subscribed.contains_more_than(connect) {
            SubscriptionType::SubscribedActive
        } else if self.subscribed.contains_more_than(connect) {
            SubscriptionType::SubscribedPassive
        } else {
            SubscriptionType::Unsubscribed
        }
    }

    pub fn subscribed_connects(&self) -> &BTreeSet<ConnectHandle> {
        self.subscribed.connects()
    }

    /// Returns true if the cumulative set changed.
    pub fn update_cumulative_subscription(
        &mut self,
        connect: ConnectHandle,
        subscribe: bool,
    ) -> bool {
        if subscribe {
            self.cumulative_subscribed.insert(connect)
        } else {
            self.cumulative_subscribed.remove(&connect)
        }
    }

    pub fn cumulative_subscribed(&self) -> &BTreeSet<ConnectHandle> {
        &self.cumulative_subscribed
    }

    pub fn seed_cumulative_from(&mut self, parent: &PublishSubscribe) {
        self.cumulative_subscribed = parent.cumulative_subscribed.clone();
    }

    /// Final cleanup when a connect disappears from the node.
    pub fn remove_connect(&mut self, connect: ConnectHandle) {
        self.published.erase(connect);
        self.subscribed.erase(connect);
        self.active_subscribed.erase(connect);
        self.cumulative_subscribed.remove(&connect);
    }
}
