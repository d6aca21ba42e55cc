//! Callbacks queued for the federate.
//!
//! The ambassador buffers everything the federation wants to tell the
//! federate; [`crate::Ambassador::evoke_callback`] pops the queue. Timestamp
//! ordered callbacks pass through the TSO queue first and only surface once
//! the corresponding advance releases them.

use accord_core::{
    AttributeHandle, FederateHandle, InteractionClassHandle, LogicalTime,
    MessageRetractionHandle, ObjectClassHandle, ObjectInstanceHandle, Payload,
};
use accord_model::{AttributeValue, OrderType, ParameterValue, TransportationType};

#[derive(Debug, Clone, PartialEq)]
pub enum FederateCallback {
    /// The transport under this ambassador failed; the federate is gone from
    /// the federation.
    ConnectionLost {
        fault: String,
    },

    SynchronizationPointRegistrationSucceeded {
        label: String,
    },
    SynchronizationPointRegistrationFailed {
        label: String,
    },
    AnnounceSynchronizationPoint {
        label: String,
        tag: Payload,
    },
    FederationSynchronized {
        label: String,
        /// Participants that reported an unsuccessful achievement.
        failed: Vec<FederateHandle>,
    },

    ObjectInstanceNameReservationSucceeded {
        name: String,
    },
    ObjectInstanceNameReservationFailed {
        name: String,
    },
    MultipleObjectInstanceNameReservationSucceeded {
        names: Vec<String>,
    },
    MultipleObjectInstanceNameReservationFailed {
        names: Vec<String>,
    },

    DiscoverObjectInstance {
        instance: ObjectInstanceHandle,
        /// The most-derived subscribed ancestor of the registered class.
        object_class: ObjectClassHandle,
        name: String,
    },
    ReflectAttributeValues {
        instance: ObjectInstanceHandle,
        attribute_values: Vec<AttributeValue>,
        tag: Payload,
        order: OrderType,
        transportation: TransportationType,
        timestamp: Option<LogicalTime>,
        retraction: Option<MessageRetractionHandle>,
    },
    RemoveObjectInstance {
        instance: ObjectInstanceHandle,
        tag: Payload,
        timestamp: Option<LogicalTime>,
        retraction: Option<MessageRetractionHandle>,
    },
    ReceiveInteraction {
        /// The most-derived subscribed class, possibly an ancestor of the
        /// sent class.
        interaction_class: InteractionClassHandle,
        parameter_values: Vec<ParameterValue>,
        tag: Payload,
        order: OrderType,
        transportation: TransportationType,
        timestamp: Option<LogicalTime>,
        retraction: Option<MessageRetractionHandle>,
    },

    AttributesInScope {
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
    },
    AttributesOutOfScope {
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
    },
    ProvideAttributeValueUpdate {
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: Payload,
    },
    TurnUpdatesOnForObjectInstance {
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
    },
    TurnUpdatesOffForObjectInstance {
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
    },
    StartRegistrationForObjectClass {
        object_class: ObjectClassHandle,
    },
    StopRegistrationForObjectClass {
        object_class: ObjectClassHandle,
    },
    TurnInteractionsOn {
        interaction_class: InteractionClassHandle,
    },
    TurnInteractionsOff {
        interaction_class: InteractionClassHandle,
    },

    TimeRegulationEnabled {
        time: LogicalTime,
    },
    TimeConstrainedEnabled {
        time: LogicalTime,
    },
    TimeAdvanceGrant {
        time: LogicalTime,
    },
}
