//! The error sum type shared across the RTI crates.

/// Everything that can go wrong between a federate service request and its
/// completion.
///
/// Local precondition errors are raised before any state mutation or message
/// send. Federation-state errors come back in a root response and are
/// translated by the requesting ambassador. Resource and transport errors are
/// unrecoverable for the affected connect: it is closed and every federate
/// reached through it is resigned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RtiError {
    // Protocol / precondition
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("federate is not an execution member")]
    FederateNotExecutionMember,
    #[error("federate already an execution member as {0:?}")]
    FederateAlreadyExecutionMember(String),
    #[error("object class not defined: {0}")]
    ObjectClassNotDefined(String),
    #[error("attribute not defined: {0}")]
    AttributeNotDefined(String),
    #[error("interaction class not defined: {0}")]
    InteractionClassNotDefined(String),
    #[error("interaction parameter not defined: {0}")]
    InteractionParameterNotDefined(String),
    #[error("object class not published: {0}")]
    ObjectClassNotPublished(String),
    #[error("interaction class not published: {0}")]
    InteractionClassNotPublished(String),
    #[error("object instance not known: {0}")]
    ObjectInstanceNotKnown(String),
    #[error("object instance name in use: {0}")]
    ObjectInstanceNameInUse(String),
    #[error("object instance name not reserved: {0}")]
    ObjectInstanceNameNotReserved(String),
    #[error("attribute not owned: {0}")]
    AttributeNotOwned(String),
    #[error("delete privilege not held for {0}")]
    DeletePrivilegeNotHeld(String),
    #[error("illegal name: {0}")]
    IllegalName(String),
    #[error("invalid region")]
    InvalidRegion,
    #[error("region was not created by this federate")]
    RegionNotCreatedByThisFederate,
    #[error("synchronization point label not announced: {0}")]
    SynchronizationPointLabelNotAnnounced(String),

    // Federation state, reported by the root
    #[error("federation execution already exists: {0}")]
    FederationExecutionAlreadyExists(String),
    #[error("federation execution does not exist: {0}")]
    FederationExecutionDoesNotExist(String),
    #[error("federates currently joined to {0}")]
    FederatesCurrentlyJoined(String),
    #[error("federate name already in use: {0}")]
    FederateNameAlreadyInUse(String),
    #[error("inconsistent FDD: {0}")]
    InconsistentFdd(String),
    #[error("error reading FDD: {0}")]
    ErrorReadingFdd(String),
    #[error("could not create logical time factory {0}")]
    CouldNotCreateLogicalTimeFactory(String),
    #[error("save in progress")]
    SaveInProgress,
    #[error("restore in progress")]
    RestoreInProgress,

    // Time
    #[error("invalid logical time")]
    InvalidLogicalTime,
    #[error("invalid lookahead")]
    InvalidLookahead,
    #[error("logical time already passed")]
    LogicalTimeAlreadyPassed,
    #[error("a time advance is already in progress")]
    InTimeAdvancingState,
    #[error("time regulation request pending")]
    RequestForTimeRegulationPending,
    #[error("time constrained request pending")]
    RequestForTimeConstrainedPending,
    #[error("time regulation already enabled")]
    TimeRegulationAlreadyEnabled,
    #[error("time regulation is not enabled")]
    TimeRegulationIsNotEnabled,
    #[error("time regulation is not permitted for this connect")]
    TimeRegulationNotPermitted,
    #[error("time constrained already enabled")]
    TimeConstrainedAlreadyEnabled,
    #[error("time constrained is not enabled")]
    TimeConstrainedIsNotEnabled,
    #[error("asynchronous delivery already enabled")]
    AsynchronousDeliveryAlreadyEnabled,
    #[error("asynchronous delivery already disabled")]
    AsynchronousDeliveryAlreadyDisabled,

    // Resource / transport, fatal for the connect
    #[error("resource error: {0}")]
    ResourceError(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("connection failed")]
    ConnectionFailed,
    #[error("operation timed out")]
    Timeout,

    // Peer sent something malformed or out of context; fatal for the connect
    #[error("message inconsistency: {0}")]
    MessageInconsistency(String),

    #[error("not supported: {0}")]
    NotSupported(&'static str),
    #[error("RTI internal error: {0}")]
    RtiInternalError(String),
}
