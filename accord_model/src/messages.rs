//! The wire protocol: one tagged message enum over a bincode-framed stream.
//!
//! Every federation-scoped message carries its [`FederationHandle`]; server
//! nodes route on it without looking into the payload. Timestamps travel as
//! encoded logical-time payloads so nodes stay agnostic of the federation's
//! time representation; only ambassadors decode them.

use serde::{Deserialize, Serialize};

use accord_core::{
    AttributeHandle, FederateHandle, FederationHandle, InteractionClassHandle,
    MessageRetractionHandle, ObjectClassHandle, ObjectInstanceHandle, ParameterHandle, Payload,
    RegionHandle,
};

use crate::fom::{FomModule, FomStringModule};
use crate::types::{
    LowerBoundCommitType, PublicationType, ResignAction, SubscriptionType, TransportationType,
};

/// What kind of peer sits behind a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectKind {
    /// A federate ambassador.
    Ambassador,
    /// A child server node.
    Node,
}

/// One attribute value inside an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub attribute: AttributeHandle,
    pub value: Payload,
}

/// One parameter value inside an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub parameter: ParameterHandle,
    pub value: Payload,
}

/// Range bounds of one region dimension, half-open `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub dimension: accord_core::DimensionHandle,
    pub lower: u64,
    pub upper: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFederationExecutionRequest {
    pub federation_name: String,
    pub logical_time_factory_name: String,
    pub fom_modules: Vec<FomStringModule>,
}

/// Root verdict on a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateFederationExecutionStatus {
    Success,
    AlreadyExists,
    CouldNotCreateLogicalTimeFactory,
    InconsistentFdd(String),
    RtiInternalError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFederationExecutionResponse {
    pub federation_name: String,
    pub status: CreateFederationExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyFederationExecutionRequest {
    pub federation_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestroyFederationExecutionStatus {
    Success,
    DoesNotExist,
    FederatesCurrentlyJoined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyFederationExecutionResponse {
    pub federation_name: String,
    pub status: DestroyFederationExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFederationExecutionRequest {
    pub federation_name: String,
    /// Empty means the RTI picks a unique name derived from the handle.
    pub federate_name: Option<String>,
    pub federate_type: String,
    pub logical_time_factory_name: String,
    pub additional_fom_modules: Vec<FomStringModule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinFederationExecutionStatus {
    Success,
    FederationExecutionDoesNotExist,
    FederateNameAlreadyInUse,
    CouldNotCreateLogicalTimeFactory,
    InconsistentFdd(String),
    RtiInternalError(String),
}

/// A regulating federate's committed state, replayed to joiners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRegulatingState {
    pub federate: FederateHandle,
    pub time_advance_timestamp: Payload,
    pub next_message_timestamp: Payload,
    pub commit_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFederationExecutionResponse {
    pub federation_name: String,
    pub status: JoinFederationExecutionStatus,
    pub federation: FederationHandle,
    pub federate: FederateHandle,
    pub federate_name: String,
    pub logical_time_factory_name: String,
    /// The complete committed module list for the joiner to replay.
    pub fom_modules: Vec<FomModule>,
    /// Already-joined federates: (handle, name, type).
    pub joined_federates: Vec<(FederateHandle, String, String)>,
    /// Time-regulating federates and their committed timestamps.
    pub time_regulating: Vec<TimeRegulatingState>,
}

/// Replicates a federation execution into a child node on first join through
/// that node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertFederationExecution {
    pub federation: FederationHandle,
    pub federation_name: String,
    pub logical_time_factory_name: String,
    pub fom_modules: Vec<FomModule>,
    pub joined_federates: Vec<(FederateHandle, String, String)>,
    pub time_regulating: Vec<TimeRegulatingState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertObjectInstance {
    pub federation: FederationHandle,
    pub instance: ObjectInstanceHandle,
    pub object_class: ObjectClassHandle,
    pub name: String,
    /// Attributes owned through the connect the message arrives on.
    pub owned_attributes: Vec<AttributeHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub federation: FederationHandle,
    pub federate: FederateHandle,
    pub instance: ObjectInstanceHandle,
    pub attribute_values: Vec<AttributeValue>,
    pub tag: Payload,
    pub transportation: TransportationType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStampedAttributeUpdate {
    pub federation: FederationHandle,
    pub federate: FederateHandle,
    pub instance: ObjectInstanceHandle,
    pub attribute_values: Vec<AttributeValue>,
    pub tag: Payload,
    pub transportation: TransportationType,
    pub timestamp: Payload,
    pub retraction: MessageRetractionHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub federation: FederationHandle,
    pub federate: FederateHandle,
    pub interaction_class: InteractionClassHandle,
    pub parameter_values: Vec<ParameterValue>,
    pub tag: Payload,
    pub transportation: TransportationType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStampedInteraction {
    pub federation: FederationHandle,
    pub federate: FederateHandle,
    pub interaction_class: InteractionClassHandle,
    pub parameter_values: Vec<ParameterValue>,
    pub tag: Payload,
    pub transportation: TransportationType,
    pub timestamp: Payload,
    pub retraction: MessageRetractionHandle,
}

/// The tagged message stream between connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RtiMsg {
    // -- connect setup ----------------------------------------------------
    /// First message on any fresh connect: the peer introduces itself.
    ConnectRequest { name: String, kind: ConnectKind },
    ConnectResponse { node_name: String },
    /// The transport under a connect failed; everything reached through it
    /// is gone.
    ConnectionLost { fault: String },

    // -- federation lifecycle ---------------------------------------------
    CreateFederationExecutionRequest(CreateFederationExecutionRequest),
    CreateFederationExecutionResponse(CreateFederationExecutionResponse),
    DestroyFederationExecutionRequest(DestroyFederationExecutionRequest),
    DestroyFederationExecutionResponse(DestroyFederationExecutionResponse),
    EnumerateFederationExecutionsRequest,
    /// (federation name, logical time factory name) pairs.
    EnumerateFederationExecutionsResponse {
        federations: Vec<(String, String)>,
    },
    InsertFederationExecution(InsertFederationExecution),
    /// Tears a federation out of a child subtree.
    EraseFederationExecution { federation: FederationHandle },
    /// A child node no longer references the federation; the handle may be
    /// reused upstream.
    ReleaseFederationHandle { federation: FederationHandle },
    /// New modules merged after a join with additional modules.
    InsertModules {
        federation: FederationHandle,
        fom_modules: Vec<FomModule>,
    },

    // -- federate lifecycle -----------------------------------------------
    JoinFederationExecutionRequest(JoinFederationExecutionRequest),
    JoinFederationExecutionResponse(JoinFederationExecutionResponse),
    JoinFederateNotify {
        federation: FederationHandle,
        federate: FederateHandle,
        federate_name: String,
        federate_type: String,
    },
    ResignFederationExecutionLeafRequest {
        federation: FederationHandle,
        federate: FederateHandle,
        resign_action: ResignAction,
    },
    ResignFederateNotify {
        federation: FederationHandle,
        federate: FederateHandle,
    },

    // -- synchronization points -------------------------------------------
    RegisterFederationSynchronizationPoint {
        federation: FederationHandle,
        federate: FederateHandle,
        label: String,
        tag: Payload,
        /// Empty means all currently joined federates participate.
        federates: Vec<FederateHandle>,
    },
    RegisterFederationSynchronizationPointResponse {
        federation: FederationHandle,
        federate: FederateHandle,
        label: String,
        success: bool,
    },
    AnnounceSynchronizationPoint {
        federation: FederationHandle,
        label: String,
        tag: Payload,
        add_joining_federates: bool,
        federates: Vec<FederateHandle>,
    },
    SynchronizationPointAchieved {
        federation: FederationHandle,
        federate: FederateHandle,
        label: String,
        successful: bool,
    },
    FederationSynchronized {
        federation: FederationHandle,
        label: String,
        /// Per-federate success flags.
        federates: Vec<(FederateHandle, bool)>,
    },

    // -- publication / subscription ---------------------------------------
    ChangeObjectClassPublication {
        federation: FederationHandle,
        object_class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        publication: PublicationType,
    },
    ChangeObjectClassSubscription {
        federation: FederationHandle,
        object_class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        subscription: SubscriptionType,
    },
    ChangeInteractionClassPublication {
        federation: FederationHandle,
        interaction_class: InteractionClassHandle,
        publication: PublicationType,
    },
    ChangeInteractionClassSubscription {
        federation: FederationHandle,
        interaction_class: InteractionClassHandle,
        subscription: SubscriptionType,
    },
    /// Registration advisory to publishing connects.
    RegistrationForObjectClass {
        federation: FederationHandle,
        object_class: ObjectClassHandle,
        start: bool,
    },
    /// Interaction advisory to publishing connects.
    TurnInteractionsOn {
        federation: FederationHandle,
        interaction_class: InteractionClassHandle,
        on: bool,
    },

    // -- object instance names and handles --------------------------------
    ReserveObjectInstanceNameRequest {
        federation: FederationHandle,
        federate: FederateHandle,
        name: String,
    },
    ReserveObjectInstanceNameResponse {
        federation: FederationHandle,
        federate: FederateHandle,
        name: String,
        success: bool,
    },
    ReserveMultipleObjectInstanceNameRequest {
        federation: FederationHandle,
        federate: FederateHandle,
        names: Vec<String>,
    },
    ReserveMultipleObjectInstanceNameResponse {
        federation: FederationHandle,
        federate: FederateHandle,
        names: Vec<String>,
        success: bool,
    },
    /// Hands reserved `(handle, name)` pairs back for reuse.
    ReleaseMultipleObjectInstanceNameHandlePairs {
        federation: FederationHandle,
        pairs: Vec<(ObjectInstanceHandle, String)>,
    },
    /// Pre-allocates a pool of instance handles with RTI-reserved names.
    ObjectInstanceHandlesRequest {
        federation: FederationHandle,
        federate: FederateHandle,
        count: u32,
    },
    ObjectInstanceHandlesResponse {
        federation: FederationHandle,
        federate: FederateHandle,
        pairs: Vec<(ObjectInstanceHandle, String)>,
    },

    // -- object instances --------------------------------------------------
    InsertObjectInstance(InsertObjectInstance),
    DeleteObjectInstance {
        federation: FederationHandle,
        federate: FederateHandle,
        instance: ObjectInstanceHandle,
        tag: Payload,
    },
    TimeStampedDeleteObjectInstance {
        federation: FederationHandle,
        federate: FederateHandle,
        instance: ObjectInstanceHandle,
        tag: Payload,
        timestamp: Payload,
        retraction: MessageRetractionHandle,
    },
    AttributeUpdate(AttributeUpdate),
    TimeStampedAttributeUpdate(TimeStampedAttributeUpdate),
    Interaction(Interaction),
    TimeStampedInteraction(TimeStampedInteraction),
    RequestAttributeUpdate {
        federation: FederationHandle,
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: Payload,
    },
    RequestClassAttributeUpdate {
        federation: FederationHandle,
        object_class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        tag: Payload,
    },
    /// Scope advisories for a known instance.
    AttributesInScope {
        federation: FederationHandle,
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
    },
    AttributesOutOfScope {
        federation: FederationHandle,
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
    },
    /// Tells the owner whether updates for these attributes have any
    /// receiver at all.
    TurnUpdatesOnForInstance {
        federation: FederationHandle,
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        on: bool,
    },

    // -- regions -----------------------------------------------------------
    InsertRegion {
        federation: FederationHandle,
        region: RegionHandle,
        dimensions: Vec<accord_core::DimensionHandle>,
    },
    CommitRegion {
        federation: FederationHandle,
        region: RegionHandle,
        bounds: Vec<RangeBounds>,
    },
    EraseRegion {
        federation: FederationHandle,
        region: RegionHandle,
    },

    // -- time management ---------------------------------------------------
    EnableTimeRegulationRequest {
        federation: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
        commit_id: u32,
    },
    EnableTimeRegulationResponse {
        federation: FederationHandle,
        /// The federate that asked to regulate.
        federate: FederateHandle,
        responding_federate: FederateHandle,
        timestamp: Payload,
        timestamp_valid: bool,
    },
    DisableTimeRegulationRequest {
        federation: FederationHandle,
        federate: FederateHandle,
    },
    CommitLowerBoundTimeStamp {
        federation: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
        commit_type: LowerBoundCommitType,
        commit_id: u32,
    },
    CommitLowerBoundTimeStampResponse {
        federation: FederationHandle,
        federate: FederateHandle,
        commit_id: u32,
    },
    /// Freezes this federate's contribution to everyone's GALT while it sits
    /// in a next-message request, so the message it is waiting for cannot be
    /// overtaken.
    LockedByNextMessageRequest {
        federation: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
    },
    TimeConstrainedEnabled {
        federation: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
    },
    TimeRegulationEnabled {
        federation: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
    },
    TimeAdvanceGranted {
        federation: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
    },
}

impl RtiMsg {
    /// The federation a message belongs to, when it is federation-scoped.
    pub fn federation(&self) -> Option<FederationHandle> {
        use RtiMsg::*;
        match self {
            ConnectRequest { .. }
            | ConnectResponse { .. }
            | ConnectionLost { .. }
            | CreateFederationExecutionRequest(..)
            | CreateFederationExecutionResponse(..)
            | DestroyFederationExecutionRequest(..)
            | DestroyFederationExecutionResponse(..)
            | EnumerateFederationExecutionsRequest
            | EnumerateFederationExecutionsResponse { .. } => None,
            InsertFederationExecution(message) => Some(message.federation),
            JoinFederationExecutionRequest(..) => None,
            JoinFederationExecutionResponse(message) => Some(message.federation),
            EraseFederationExecution { federation }
            | ReleaseFederationHandle { federation }
            | InsertModules { federation, .. }
            | JoinFederateNotify { federation, .. }
            | ResignFederationExecutionLeafRequest { federation, .. }
            | ResignFederateNotify { federation, .. }
            | RegisterFederationSynchronizationPoint { federation, .. }
            | RegisterFederationSynchronizationPointResponse { federation, .. }
            | AnnounceSynchronizationPoint { federation, .. }
            | SynchronizationPointAchieved { federation, .. }
            | FederationSynchronized { federation, .. }
            | ChangeObjectClassPublication { federation, .. }
            | ChangeObjectClassSubscription { federation, .. }
            | ChangeInteractionClassPublication { federation, .. }
            | ChangeInteractionClassSubscription { federation, .. }
            | RegistrationForObjectClass { federation, .. }
            | TurnInteractionsOn { federation, .. }
            | ReserveObjectInstanceNameRequest { federation, .. }
            | ReserveObjectInstanceNameResponse { federation, .. }
            | ReserveMultipleObjectInstanceNameRequest { federation, .. }
            | ReserveMultipleObjectInstanceNameResponse { federation, .. }
            | ReleaseMultipleObjectInstanceNameHandlePairs { federation, .. }
            | ObjectInstanceHandlesRequest { federation, .. }
            | ObjectInstanceHandlesResponse { federation, .. }
            | DeleteObjectInstance { federation, .. }
            | TimeStampedDeleteObjectInstance { federation, .. }
            | RequestAttributeUpdate { federation, .. }
            | RequestClassAttributeUpdate { federation, .. }
            | AttributesInScope { federation, .. }
            | AttributesOutOfScope { federation, .. }
            | TurnUpdatesOnForInstance { federation, .. }
            | InsertRegion { federation, .. }
            | CommitRegion { federation, .. }
            | EraseRegion { federation, .. }
            | EnableTimeRegulationRequest { federation, .. }
            | EnableTimeRegulationResponse { federation, .. }
            | DisableTimeRegulationRequest { federation, .. }
            | CommitLowerBoundTimeStamp { federation, .. }
            | CommitLowerBoundTimeStampResponse { federation, .. }
            | LockedByNextMessageRequest { federation, .. }
            | TimeConstrainedEnabled { federation, .. }
            | TimeRegulationEnabled { federation, .. }
            | TimeAdvanceGranted { federation, .. } => Some(*federation),
            InsertObjectInstance(message) => Some(message.federation),
            AttributeUpdate(message) => Some(message.federation),
            TimeStampedAttributeUpdate(message) => Some(message.federation),
            Interaction(message) => Some(message.federation),
            TimeStampedInteraction(message) => Some(message.federation),
        }
    }
}

