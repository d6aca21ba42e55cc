//! The federate ambassador: the client-side mirror of federation state and
//! the single place all RTI service calls go through.
//!
//! Processing is single-threaded and cooperative. The connection task only
//! frames and forwards bytes; every protocol message is handled inside the
//! user's task, either during an API call, during a synchronous rendezvous,
//! or while waiting in [`Ambassador::evoke_callback`].

use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;

use accord_core::{
    AttributeHandle, DimensionHandle, FederateHandle, FederationHandle, InteractionClassHandle,
    LogicalTime, LogicalTimeInterval, MessageRetractionHandle, ObjectClassHandle,
    ObjectInstanceHandle, Payload, RegionHandle, RtiError,
};
use accord_model::{
    codec, AttributeValue, ConnectKind, CreateFederationExecutionRequest,
    CreateFederationExecutionStatus, DestroyFederationExecutionRequest,
    DestroyFederationExecutionStatus, InsertObjectInstance, JoinFederationExecutionRequest,
    JoinFederationExecutionStatus, OrderType, ParameterValue, PublicationType, RangeBounds,
    ResignAction, RtiMsg, SubscriptionType, TransportationType,
};

use crate::callbacks::FederateCallback;
use crate::state::{FederationMirror, KnownInstance};
use crate::time::{AdvanceMode, TimeAction, TimeManager};

/// Wall-clock deadline for synchronous protocol rendezvous (create, destroy,
/// join, name reservation). Exceeding it is an internal error.
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(70);

/// Size of the pre-allocated object-instance handle pool.
const HANDLE_POOL_SIZE: u32 = 16;

#[derive(Debug)]
pub struct Ambassador {
    sender: mpsc::UnboundedSender<RtiMsg>,
    receiver: mpsc::UnboundedReceiver<RtiMsg>,
    _reader_handle: JoinHandle<()>,
    node_name: String,
    connected: bool,
    federation: Option<FederationMirror>,
    time: Option<TimeManager>,
    callbacks: VecDeque<FederateCallback>,
}

/// Connect to a server node.
///
/// Performs the connect handshake and spawns the tasks that pump the framed
/// transport; the returned [`Ambassador`] owns all federate state.
#[tracing::instrument]
pub async fn connect(addr: SocketAddr, name: &str) -> Result<Ambassador, RtiError> {
    tracing::info!("Connecting to RTI node..");
    let socket = TcpStream::connect(&addr)
        .await
        .map_err(|err| RtiError::TransportError(err.to_string()))?;
    let mut frame = Framed::new(socket, codec::create::<RtiMsg>());

    frame
        .send(RtiMsg::ConnectRequest {
            name: name.to_string(),
            kind: ConnectKind::Ambassador,
        })
        .await
        .map_err(|err| RtiError::TransportError(err.to_string()))?;

    let node_name = match tokio::time::timeout(RENDEZVOUS_TIMEOUT, frame.next()).await {
        Err(_) => return Err(RtiError::RtiInternalError("connect handshake timed out".into())),
        Ok(Some(Ok(RtiMsg::ConnectResponse { node_name }))) => node_name,
        Ok(Some(Ok(other))) => {
            tracing::error!(?other, "Unexpected handshake reply.");
            return Err(RtiError::MessageInconsistency(
                "unexpected handshake reply".into(),
            ));
        }
        _ => return Err(RtiError::ConnectionFailed),
    };
    tracing::info!(%node_name, "Connected to RTI node.");

    let (frame_sink, mut frame_stream) = frame.split();

    // Wrap the sink in an unbounded channel so API calls never block on the
    // socket.
    let sender = {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(
            UnboundedReceiverStream::new(receiver)
                .map(Ok)
                .forward(frame_sink),
        );
        sender
    };

    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let reader_handle = tokio::spawn(async move {
        while let Some(result) = frame_stream.next().await {
            match result {
                Ok(msg) => {
                    if incoming_tx.send(msg).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::error!(%err, "Error decoding message from the RTI node.");
                    break;
                }
            }
        }
        // Channel closure is how the ambassador observes the disconnect.
    });

    Ok(Ambassador {
        sender,
        receiver: incoming_rx,
        _reader_handle: reader_handle,
        node_name,
        connected: true,
        federation: None,
        time: None,
        callbacks: VecDeque::new(),
    })
}

impl Ambassador {
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn federation_handle(&self) -> Option<FederationHandle> {
        self.federation.as_ref().map(|federation| federation.federation)
    }

    pub fn federate_handle(&self) -> Option<FederateHandle> {
        self.federation.as_ref().map(|federation| federation.federate)
    }

    fn send(&self, msg: RtiMsg) -> Result<(), RtiError> {
        if !self.connected {
            return Err(RtiError::NotConnected);
        }
        self.sender.send(msg).map_err(|_| RtiError::ConnectionFailed)
    }

    fn joined(&self) -> Result<&FederationMirror, RtiError> {
        self.federation
            .as_ref()
            .ok_or(RtiError::FederateNotExecutionMember)
    }

    fn joined_mut(&mut self) -> Result<&mut FederationMirror, RtiError> {
        self.federation
            .as_mut()
            .ok_or(RtiError::FederateNotExecutionMember)
    }

    fn time_mut(&mut self) -> Result<&mut TimeManager, RtiError> {
        self.time.as_mut().ok_or(RtiError::FederateNotExecutionMember)
    }

    // -- message pump ------------------------------------------------------

    /// Drain and process everything that already arrived, without waiting.
    pub fn process_messages(&mut self) {
        while let Ok(msg) = self.receiver.try_recv() {
            self.process_message(msg);
        }
    }

    /// Wait up to `timeout` wall-clock time for a callback and pop it.
    pub async fn evoke_callback(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<FederateCallback>, RtiError> {
        self.process_messages();
        if let Some(callback) = self.callbacks.pop_front() {
            return Ok(Some(callback));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, self.receiver.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    self.connected = false;
                    return Err(RtiError::ConnectionFailed);
                }
                Ok(Some(msg)) => {
                    self.process_message(msg);
                    if let Some(callback) = self.callbacks.pop_front() {
                        return Ok(Some(callback));
                    }
                }
            }
        }
    }

    /// Block on the connection until `extract` recognizes the reply,
    /// processing everything else as usual. Bounded by the rendezvous
    /// deadline.
    async fn rendezvous<R>(
        &mut self,
        mut extract: impl FnMut(&mut Self, RtiMsg) -> Option<R>,
    ) -> Result<R, RtiError> {
        let deadline = Instant::now() + RENDEZVOUS_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RtiError::RtiInternalError(
                    "synchronous request timed out".into(),
                ));
            }
            match tokio::time::timeout(remaining, self.receiver.recv()).await {
                Err(_) => {
                    return Err(RtiError::RtiInternalError(
                        "synchronous request timed out".into(),
                    ))
                }
                Ok(None) => {
                    self.connected = false;
                    return Err(RtiError::ConnectionFailed);
                }
                Ok(Some(msg)) => {
                    if let Some(result) = extract(self, msg) {
                        return Ok(result);
                    }
                }
            }
        }
    }

    fn apply_time_actions(&mut self, actions: Vec<TimeAction>) {
        for action in actions {
            match action {
                TimeAction::Commit {
                    timestamp,
                    commit_type,
                    commit_id,
                } => {
                    if let Some(federation) = &self.federation {
                        let msg = RtiMsg::CommitLowerBoundTimeStamp {
                            federation: federation.federation,
                            federate: federation.federate,
                            timestamp: timestamp.to_payload(),
                            commit_type,
                            commit_id,
                        };
                        let _ = self.send(msg);
                    }
                }
                TimeAction::Lock { timestamp } => {
                    if let Some(federation) = &self.federation {
                        let msg = RtiMsg::LockedByNextMessageRequest {
                            federation: federation.federation,
                            federate: federation.federate,
                            timestamp: timestamp.to_payload(),
                        };
                        let _ = self.send(msg);
                    }
                }
                TimeAction::Callback(callback) => self.callbacks.push_back(callback),
            }
        }
    }

    fn queue_receive_order(&mut self, callback: FederateCallback) {
        let actions = match &mut self.time {
            Some(time) => time.queue_receive_order(callback),
            None => vec![TimeAction::Callback(callback)],
        };
        self.apply_time_actions(actions);
    }

    fn queue_timestamped(&mut self, timestamp: LogicalTime, callback: FederateCallback) {
        let actions = match &mut self.time {
            Some(time) => time.queue_timestamped(timestamp, callback),
            None => vec![TimeAction::Callback(callback)],
        };
        self.apply_time_actions(actions);
    }

    /// Handle one message from the node.
    fn process_message(&mut self, msg: RtiMsg) {
        use RtiMsg::*;
        match msg {
            ConnectionLost { fault } => {
                tracing::error!(%fault, "Connection lost.");
                self.connected = false;
                self.federation = None;
                self.time = None;
                self.callbacks
                    .push_back(FederateCallback::ConnectionLost { fault });
            }

            InsertModules { fom_modules, .. } => {
                if let Some(federation) = &mut self.federation {
                    federation.insert_modules(&fom_modules);
                }
            }
            JoinFederateNotify {
                federate,
                federate_name,
                federate_type,
                ..
            } => {
                if let Some(federation) = &mut self.federation {
                    federation
                        .joined_federates
                        .insert(federate, (federate_name, federate_type));
                }
            }
            ResignFederateNotify { federate, .. } => {
                if let Some(federation) = &mut self.federation {
                    federation.joined_federates.remove(&federate);
                }
                if let Some(time) = &mut self.time {
                    let actions = time.forget_federate(federate);
                    self.apply_time_actions(actions);
                }
            }

            AnnounceSynchronizationPoint {
                label,
                tag,
                federates,
                ..
            } => {
                let Some(federation) = &mut self.federation else {
                    return;
                };
                if !federates.contains(&federation.federate) {
                    return;
                }
                federation.announced_labels.insert(label.clone());
                self.queue_receive_order(FederateCallback::AnnounceSynchronizationPoint {
                    label,
                    tag,
                });
            }
            FederationSynchronized {
                label, federates, ..
            } => {
                if let Some(federation) = &mut self.federation {
                    federation.announced_labels.remove(&label);
                }
                let failed = federates
                    .into_iter()
                    .filter_map(|(federate, ok)| (!ok).then_some(federate))
                    .collect();
                self.queue_receive_order(FederateCallback::FederationSynchronized {
                    label,
                    failed,
                });
            }
            RegisterFederationSynchronizationPointResponse { label, success, .. } => {
                let callback = if success {
                    FederateCallback::SynchronizationPointRegistrationSucceeded { label }
                } else {
                    FederateCallback::SynchronizationPointRegistrationFailed { label }
                };
                self.queue_receive_order(callback);
            }

            ReserveObjectInstanceNameResponse { name, success, .. } => {
                self.finish_name_reservation(vec![name], success, false);
            }
            ReserveMultipleObjectInstanceNameResponse { names, success, .. } => {
                self.finish_name_reservation(names, success, true);
            }
            ObjectInstanceHandlesResponse { pairs, .. } => {
                if let Some(federation) = &mut self.federation {
                    federation.handle_pool.extend(pairs);
                }
            }

            InsertObjectInstance(insert) => self.handle_discover(insert),
            AttributeUpdate(update) => {
                let Some(federation) = &self.federation else {
                    return;
                };
                if !federation.instances.contains_key(&update.instance) {
                    return;
                }
                self.queue_receive_order(FederateCallback::ReflectAttributeValues {
                    instance: update.instance,
                    attribute_values: update.attribute_values,
                    tag: update.tag,
                    order: OrderType::Receive,
                    transportation: update.transportation,
                    timestamp: None,
                    retraction: None,
                });
            }
            TimeStampedAttributeUpdate(update) => {
                let Some(federation) = &self.federation else {
                    return;
                };
                if !federation.instances.contains_key(&update.instance) {
                    return;
                }
                let Ok(timestamp) = LogicalTime::from_payload(&update.timestamp) else {
                    tracing::error!("Undecodable timestamp on an attribute update.");
                    return;
                };
                let constrained = self.time.as_ref().is_some_and(TimeManager::is_constrained);
                let callback = FederateCallback::ReflectAttributeValues {
                    instance: update.instance,
                    attribute_values: update.attribute_values,
                    tag: update.tag,
                    order: if constrained {
                        OrderType::Timestamp
                    } else {
                        OrderType::Receive
                    },
                    transportation: update.transportation,
                    timestamp: Some(timestamp),
                    retraction: Some(update.retraction),
                };
                self.queue_timestamped(timestamp, callback);
            }
            Interaction(interaction) => {
                let Some(federation) = &self.federation else {
                    return;
                };
                let Some(known_class) =
                    federation.known_interaction_class(interaction.interaction_class)
                else {
                    return;
                };
                self.queue_receive_order(FederateCallback::ReceiveInteraction {
                    interaction_class: known_class,
                    parameter_values: interaction.parameter_values,
                    tag: interaction.tag,
                    order: OrderType::Receive,
                    transportation: interaction.transportation,
                    timestamp: None,
                    retraction: None,
                });
            }
            TimeStampedInteraction(interaction) => {
                let Some(federation) = &self.federation else {
                    return;
                };
                let Some(known_class) =
                    federation.known_interaction_class(interaction.interaction_class)
                else {
                    return;
                };
                let Ok(timestamp) = LogicalTime::from_payload(&interaction.timestamp) else {
                    tracing::error!("Undecodable timestamp on an interaction.");
                    return;
                };
                let constrained = self.time.as_ref().is_some_and(TimeManager::is_constrained);
                let callback = FederateCallback::ReceiveInteraction {
                    interaction_class: known_class,
                    parameter_values: interaction.parameter_values,
                    tag: interaction.tag,
                    order: if constrained {
                        OrderType::Timestamp
                    } else {
                        OrderType::Receive
                    },
                    transportation: interaction.transportation,
                    timestamp: Some(timestamp),
                    retraction: Some(interaction.retraction),
                };
                self.queue_timestamped(timestamp, callback);
            }
            DeleteObjectInstance { instance, tag, .. } => {
                let removed = self
                    .federation
                    .as_mut()
                    .and_then(|federation| federation.remove_instance(instance));
                if removed.is_some() {
                    self.queue_receive_order(FederateCallback::RemoveObjectInstance {
                        instance,
                        tag,
                        timestamp: None,
                        retraction: None,
                    });
                }
            }
            TimeStampedDeleteObjectInstance {
                instance,
                tag,
                timestamp,
                retraction,
                ..
            } => {
                let removed = self
                    .federation
                    .as_mut()
                    .and_then(|federation| federation.remove_instance(instance));
                if removed.is_none() {
                    return;
                }
                let Ok(timestamp) = LogicalTime::from_payload(&timestamp) else {
                    return;
                };
                self.queue_timestamped(
                    timestamp,
                    FederateCallback::RemoveObjectInstance {
                        instance,
                        tag,
                        timestamp: Some(timestamp),
                        retraction: Some(retraction),
                    },
                );
            }

            AttributesInScope {
                instance,
                attributes,
                ..
            } => self.queue_receive_order(FederateCallback::AttributesInScope {
                instance,
                attributes,
            }),
            AttributesOutOfScope {
                instance,
                attributes,
                ..
            } => self.queue_receive_order(FederateCallback::AttributesOutOfScope {
                instance,
                attributes,
            }),
            RequestAttributeUpdate {
                instance,
                attributes,
                tag,
                ..
            } => {
                let Some(federation) = &self.federation else {
                    return;
                };
                let Some(known) = federation.instance(instance) else {
                    return;
                };
                let owned: Vec<_> = attributes
                    .into_iter()
                    .filter(|attribute| known.owned_attributes.contains(attribute))
                    .collect();
                if !owned.is_empty() {
                    self.queue_receive_order(FederateCallback::ProvideAttributeValueUpdate {
                        instance,
                        attributes: owned,
                        tag,
                    });
                }
            }
            RequestClassAttributeUpdate {
                object_class,
                attributes,
                tag,
                ..
            } => self.handle_request_class_update(object_class, attributes, tag),
            TurnUpdatesOnForInstance {
                instance,
                attributes,
                on,
                ..
            } => {
                let callback = if on {
                    FederateCallback::TurnUpdatesOnForObjectInstance {
                        instance,
                        attributes,
                    }
                } else {
                    FederateCallback::TurnUpdatesOffForObjectInstance {
                        instance,
                        attributes,
                    }
                };
                self.queue_receive_order(callback);
            }
            RegistrationForObjectClass {
                object_class,
                start,
                ..
            } => {
                let callback = if start {
                    FederateCallback::StartRegistrationForObjectClass { object_class }
                } else {
                    FederateCallback::StopRegistrationForObjectClass { object_class }
                };
                self.queue_receive_order(callback);
            }
            TurnInteractionsOn {
                interaction_class,
                on,
                ..
            } => {
                let callback = if on {
                    FederateCallback::TurnInteractionsOn { interaction_class }
                } else {
                    FederateCallback::TurnInteractionsOff { interaction_class }
                };
                self.queue_receive_order(callback);
            }

            EnableTimeRegulationRequest {
                federate,
                timestamp,
                ..
            } => {
                let Ok(timestamp) = LogicalTime::from_payload(&timestamp) else {
                    return;
                };
                let Some(time) = &mut self.time else {
                    return;
                };
                time.add_regulator(federate, timestamp);
                let response = self.federation.as_ref().map(|federation| {
                    let time = self.time.as_ref().expect("time state while joined");
                    RtiMsg::EnableTimeRegulationResponse {
                        federation: federation.federation,
                        federate,
                        responding_federate: federation.federate,
                        timestamp: time.logical_time().to_payload(),
                        timestamp_valid: time.is_constrained(),
                    }
                });
                if let Some(response) = response {
                    let _ = self.send(response);
                }
                if let Some(time) = &mut self.time {
                    let actions = time.evaluate();
                    self.apply_time_actions(actions);
                }
            }
            EnableTimeRegulationResponse {
                responding_federate,
                timestamp,
                timestamp_valid,
                ..
            } => {
                let timestamp = timestamp_valid
                    .then(|| LogicalTime::from_payload(&timestamp).ok())
                    .flatten();
                if let Some(time) = &mut self.time {
                    let actions = time.handle_regulation_response(responding_federate, timestamp);
                    self.apply_time_actions(actions);
                }
            }
            DisableTimeRegulationRequest { federate, .. } => {
                if let Some(time) = &mut self.time {
                    let actions = time.forget_federate(federate);
                    self.apply_time_actions(actions);
                }
            }
            CommitLowerBoundTimeStamp {
                federate,
                timestamp,
                commit_type,
                ..
            } => {
                let Ok(timestamp) = LogicalTime::from_payload(&timestamp) else {
                    return;
                };
                if let Some(time) = &mut self.time {
                    let actions = time.apply_commit(federate, commit_type, timestamp);
                    self.apply_time_actions(actions);
                }
            }
            CommitLowerBoundTimeStampResponse { commit_id, .. } => {
                if let Some(time) = &mut self.time {
                    time.acknowledge_commit(commit_id);
                }
            }
            LockedByNextMessageRequest {
                federate,
                timestamp,
                ..
            } => {
                let Ok(timestamp) = LogicalTime::from_payload(&timestamp) else {
                    return;
                };
                if let Some(time) = &mut self.time {
                    let actions = time.apply_lock(federate, timestamp);
                    self.apply_time_actions(actions);
                }
            }

            // Wire forms of the addressed callback messages.
            TimeRegulationEnabled { timestamp, .. } => {
                if let Ok(time) = LogicalTime::from_payload(&timestamp) {
                    self.callbacks
                        .push_back(FederateCallback::TimeRegulationEnabled { time });
                }
            }
            TimeConstrainedEnabled { timestamp, .. } => {
                if let Ok(time) = LogicalTime::from_payload(&timestamp) {
                    self.callbacks
                        .push_back(FederateCallback::TimeConstrainedEnabled { time });
                }
            }
            TimeAdvanceGranted { timestamp, .. } => {
                if let Ok(time) = LogicalTime::from_payload(&timestamp) {
                    self.callbacks
                        .push_back(FederateCallback::TimeAdvanceGrant { time });
                }
            }

            // Tree bookkeeping a leaf does not track.
            InsertFederationExecution(..)
            | EraseFederationExecution { .. }
            | ReleaseFederationHandle { .. }
            | InsertRegion { .. }
            | CommitRegion { .. }
            | EraseRegion { .. }
            | ConnectResponse { .. } => {}

            other => {
                tracing::debug!(?other, "Ignoring message without local meaning.");
            }
        }
    }

    fn handle_discover(&mut self, insert: InsertObjectInstance) {
        let Some(federation) = &self.federation else {
            return;
        };
        if federation.instances.contains_key(&insert.instance) {
            return;
        }
        let Some(known_class) = federation.known_object_class(insert.object_class) else {
            // Not subscribed anywhere on the path; nothing to discover.
            return;
        };
        if let Some(federation) = &mut self.federation {
            federation.insert_instance(KnownInstance {
                handle: insert.instance,
                name: insert.name.clone(),
                registered_class: insert.object_class,
                known_class,
                owned_attributes: BTreeSet::new(),
            });
        }
        self.queue_receive_order(FederateCallback::DiscoverObjectInstance {
            instance: insert.instance,
            object_class: known_class,
            name: insert.name,
        });
    }

    fn handle_request_class_update(
        &mut self,
        object_class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        tag: Payload,
    ) {
        let Some(federation) = &self.federation else {
            return;
        };
        let mut provide = Vec::new();
        for instance in federation.instances.values() {
            // The request covers the class and everything derived from it.
            let mut current = Some(instance.registered_class);
            let mut matches = false;
            while let Some(class) = current {
                if class == object_class {
                    matches = true;
                    break;
                }
                current = federation
                    .object_class(class)
                    .and_then(|mirror| mirror.parent);
            }
            if !matches {
                continue;
            }
            let owned: Vec<_> = attributes
                .iter()
                .copied()
                .filter(|attribute| instance.owned_attributes.contains(attribute))
                .collect();
            if !owned.is_empty() {
                provide.push((instance.handle, owned));
            }
        }
        for (instance, attributes) in provide {
            self.queue_receive_order(FederateCallback::ProvideAttributeValueUpdate {
                instance,
                attributes,
                tag: tag.clone(),
            });
        }
    }

    fn finish_name_reservation(&mut self, names: Vec<String>, success: bool, multiple: bool) {
        if success {
            if let Some(federation) = &mut self.federation {
                federation.reserved_names.extend(names.iter().cloned());
            }
        }
        let callback = match (multiple, success) {
            (false, true) => FederateCallback::ObjectInstanceNameReservationSucceeded {
                name: names.into_iter().next().unwrap_or_default(),
            },
            (false, false) => FederateCallback::ObjectInstanceNameReservationFailed {
                name: names.into_iter().next().unwrap_or_default(),
            },
            (true, true) => {
                FederateCallback::MultipleObjectInstanceNameReservationSucceeded { names }
            }
            (true, false) => {
                FederateCallback::MultipleObjectInstanceNameReservationFailed { names }
            }
        };
        self.queue_receive_order(callback);
    }
}

// ---------------------------------------------------------------------------
// Federation lifecycle services

impl Ambassador {
    /// Create a federation execution on the root server.
    pub async fn create_federation_execution(
        &mut self,
        federation_name: &str,
        fom_modules: Vec<accord_model::FomStringModule>,
        logical_time_factory_name: &str,
    ) -> Result<(), RtiError> {
        self.send(RtiMsg::CreateFederationExecutionRequest(
            CreateFederationExecutionRequest {
                federation_name: federation_name.to_string(),
                logical_time_factory_name: logical_time_factory_name.to_string(),
                fom_modules,
            },
        ))?;

        let status = self
            .rendezvous(|ambassador, msg| match msg {
                RtiMsg::CreateFederationExecutionResponse(response)
                    if response.federation_name == federation_name =>
                {
                    Some(response.status)
                }
                other => {
                    ambassador.process_message(other);
                    None
                }
            })
            .await?;

        match status {
            CreateFederationExecutionStatus::Success => Ok(()),
            CreateFederationExecutionStatus::AlreadyExists => Err(
                RtiError::FederationExecutionAlreadyExists(federation_name.to_string()),
            ),
            CreateFederationExecutionStatus::CouldNotCreateLogicalTimeFactory => Err(
                RtiError::CouldNotCreateLogicalTimeFactory(logical_time_factory_name.to_string()),
            ),
            CreateFederationExecutionStatus::InconsistentFdd(reason) => {
                Err(RtiError::InconsistentFdd(reason))
            }
            CreateFederationExecutionStatus::RtiInternalError(reason) => {
                Err(RtiError::RtiInternalError(reason))
            }
        }
    }

    /// Destroy a federation execution; fails while federates are joined.
    pub async fn destroy_federation_execution(
        &mut self,
        federation_name: &str,
    ) -> Result<(), RtiError> {
        self.send(RtiMsg::DestroyFederationExecutionRequest(
            DestroyFederationExecutionRequest {
                federation_name: federation_name.to_string(),
            },
        ))?;

        let status = self
            .rendezvous(|ambassador, msg| match msg {
                RtiMsg::DestroyFederationExecutionResponse(response)
                    if response.federation_name == federation_name =>
                {
                    Some(response.status)
                }
                other => {
                    ambassador.process_message(other);
                    None
                }
            })
            .await?;

        match status {
            DestroyFederationExecutionStatus::Success => Ok(()),
            DestroyFederationExecutionStatus::DoesNotExist => Err(
                RtiError::FederationExecutionDoesNotExist(federation_name.to_string()),
            ),
            DestroyFederationExecutionStatus::FederatesCurrentlyJoined => {
                Err(RtiError::FederatesCurrentlyJoined(federation_name.to_string()))
            }
        }
    }

    /// List the federation executions the root knows, as
    /// `(name, logical time factory name)` pairs.
    pub async fn list_federation_executions(&mut self) -> Result<Vec<(String, String)>, RtiError> {
        self.send(RtiMsg::EnumerateFederationExecutionsRequest)?;
        self.rendezvous(|ambassador, msg| match msg {
            RtiMsg::EnumerateFederationExecutionsResponse { federations } => Some(federations),
            other => {
                ambassador.process_message(other);
                None
            }
        })
        .await
    }

    /// Join a federation execution.
    pub async fn join_federation_execution(
        &mut self,
        federation_name: &str,
        federate_name: Option<&str>,
        federate_type: &str,
        additional_fom_modules: Vec<accord_model::FomStringModule>,
    ) -> Result<(FederationHandle, FederateHandle), RtiError> {
        if let Some(federation) = &self.federation {
            return Err(RtiError::FederateAlreadyExecutionMember(
                federation.federate_name.clone(),
            ));
        }

        self.send(RtiMsg::JoinFederationExecutionRequest(
            JoinFederationExecutionRequest {
                federation_name: federation_name.to_string(),
                federate_name: federate_name.map(str::to_string),
                federate_type: federate_type.to_string(),
                logical_time_factory_name: accord_core::TIME_FACTORY_FLOAT64.to_string(),
                additional_fom_modules,
            },
        ))?;

        let response = self
            .rendezvous(|ambassador, msg| match msg {
                RtiMsg::JoinFederationExecutionResponse(response)
                    if response.federation_name == federation_name =>
                {
                    Some(response)
                }
                other => {
                    ambassador.process_message(other);
                    None
                }
            })
            .await?;

        match response.status {
            JoinFederationExecutionStatus::Success => {}
            JoinFederationExecutionStatus::FederationExecutionDoesNotExist => {
                return Err(RtiError::FederationExecutionDoesNotExist(
                    federation_name.to_string(),
                ))
            }
            JoinFederationExecutionStatus::FederateNameAlreadyInUse => {
                return Err(RtiError::FederateNameAlreadyInUse(
                    federate_name.unwrap_or_default().to_string(),
                ))
            }
            JoinFederationExecutionStatus::CouldNotCreateLogicalTimeFactory => {
                return Err(RtiError::CouldNotCreateLogicalTimeFactory(
                    accord_core::TIME_FACTORY_FLOAT64.to_string(),
                ))
            }
            JoinFederationExecutionStatus::InconsistentFdd(reason) => {
                return Err(RtiError::InconsistentFdd(reason))
            }
            JoinFederationExecutionStatus::RtiInternalError(reason) => {
                return Err(RtiError::RtiInternalError(reason))
            }
        }

        let mut mirror = FederationMirror::new(
            response.federation,
            response.federation_name.clone(),
            response.federate,
            response.federate_name.clone(),
            response.logical_time_factory_name.clone(),
        );
        mirror.insert_modules(&response.fom_modules);
        for (federate, name, federate_type) in response.joined_federates {
            mirror.joined_federates.insert(federate, (name, federate_type));
        }

        let mut time = TimeManager::new(response.federate);
        for state in response.time_regulating {
            if state.federate == response.federate {
                continue;
            }
            if let Ok(timestamp) = LogicalTime::from_payload(&state.time_advance_timestamp) {
                time.add_regulator(state.federate, timestamp);
            }
        }

        self.federation = Some(mirror);
        self.time = Some(time);

        // Warm up the registration handle pool.
        self.send(RtiMsg::ObjectInstanceHandlesRequest {
            federation: response.federation,
            federate: response.federate,
            count: HANDLE_POOL_SIZE,
        })?;

        tracing::info!(
            federation = %federation_name,
            federate = %response.federate_name,
            "Joined federation execution."
        );
        Ok((response.federation, response.federate))
    }

    /// Resign from the joined federation, applying `resign_action` to owned
    /// objects and held ownerships.
    pub fn resign_federation_execution(
        &mut self,
        resign_action: ResignAction,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        let unused_pairs: Vec<_> = federation.handle_pool.iter().cloned().collect();

        if !unused_pairs.is_empty() {
            self.send(RtiMsg::ReleaseMultipleObjectInstanceNameHandlePairs {
                federation: federation_handle,
                pairs: unused_pairs,
            })?;
        }
        self.send(RtiMsg::ResignFederationExecutionLeafRequest {
            federation: federation_handle,
            federate,
            resign_action,
        })?;

        self.federation = None;
        self.time = None;
        self.callbacks.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Declaration management

impl Ambassador {
    pub fn object_class_handle(&self, name: &str) -> Result<ObjectClassHandle, RtiError> {
        self.joined()?
            .object_class_by_name(name)
            .map(|class| class.handle)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(name.to_string()))
    }

    pub fn attribute_handle(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, RtiError> {
        let mirror = self
            .joined()?
            .object_class(class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{class:?}")))?;
        mirror
            .attribute_by_name(name)
            .map(|attribute| attribute.handle)
            .ok_or_else(|| RtiError::AttributeNotDefined(name.to_string()))
    }

    pub fn interaction_class_handle(&self, name: &str) -> Result<InteractionClassHandle, RtiError> {
        self.joined()?
            .interaction_class_by_name(name)
            .map(|class| class.handle)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(name.to_string()))
    }

    pub fn publish_object_class_attributes(
        &mut self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .object_class(class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{class:?}")))?;
        for attribute in attributes {
            if mirror.attribute(*attribute).is_none() {
                return Err(RtiError::AttributeNotDefined(format!("{attribute:?}")));
            }
        }

        // Publication always carries the privilege to delete.
        let mut published: Vec<_> = attributes.to_vec();
        if !published.contains(&AttributeHandle::PRIVILEGE_TO_DELETE) {
            published.push(AttributeHandle::PRIVILEGE_TO_DELETE);
        }

        let federation = self.joined_mut()?;
        if let Some(mirror) = federation.object_class_mut(class) {
            mirror.published.extend(published.iter().copied());
        }
        self.send(RtiMsg::ChangeObjectClassPublication {
            federation: federation_handle,
            object_class: class,
            attributes: published,
            publication: PublicationType::Published,
        })
    }

    pub fn unpublish_object_class(&mut self, class: ObjectClassHandle) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .object_class_mut(class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{class:?}")))?;
        let attributes: Vec<_> = std::mem::take(&mut mirror.published).into_iter().collect();
        if attributes.is_empty() {
            return Ok(());
        }
        self.send(RtiMsg::ChangeObjectClassPublication {
            federation: federation_handle,
            object_class: class,
            attributes,
            publication: PublicationType::Unpublished,
        })
    }

    pub fn subscribe_object_class_attributes(
        &mut self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
        active: bool,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .object_class(class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{class:?}")))?;
        for attribute in attributes {
            if mirror.attribute(*attribute).is_none() {
                return Err(RtiError::AttributeNotDefined(format!("{attribute:?}")));
            }
        }
        let subscription = if active {
            SubscriptionType::SubscribedActive
        } else {
            SubscriptionType::SubscribedPassive
        };

        // Subscribing any attribute implies interest in discovering the
        // instances, which rides on the privilege to delete.
        let mut subscribed: Vec<_> = attributes.to_vec();
        if !subscribed.contains(&AttributeHandle::PRIVILEGE_TO_DELETE) {
            subscribed.push(AttributeHandle::PRIVILEGE_TO_DELETE);
        }

        let federation = self.joined_mut()?;
        if let Some(mirror) = federation.object_class_mut(class) {
            for attribute in &subscribed {
                mirror.subscribed.insert(*attribute, subscription);
            }
        }
        self.send(RtiMsg::ChangeObjectClassSubscription {
            federation: federation_handle,
            object_class: class,
            attributes: subscribed,
            subscription,
        })
    }

    /// Withdraw the class subscription. The privilege-to-delete subscription
    /// is deliberately retained so already-discovered instances keep their
    /// lifecycle messages.
    pub fn unsubscribe_object_class(&mut self, class: ObjectClassHandle) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .object_class_mut(class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{class:?}")))?;
        let attributes: Vec<_> = mirror
            .subscribed
            .keys()
            .copied()
            .filter(|attribute| *attribute != AttributeHandle::PRIVILEGE_TO_DELETE)
            .collect();
        mirror
            .subscribed
            .retain(|attribute, _| *attribute == AttributeHandle::PRIVILEGE_TO_DELETE);
        if attributes.is_empty() {
            return Ok(());
        }
        self.send(RtiMsg::ChangeObjectClassSubscription {
            federation: federation_handle,
            object_class: class,
            attributes,
            subscription: SubscriptionType::Unsubscribed,
        })
    }

    pub fn publish_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .interaction_class_mut(class)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(format!("{class:?}")))?;
        mirror.published = true;
        self.send(RtiMsg::ChangeInteractionClassPublication {
            federation: federation_handle,
            interaction_class: class,
            publication: PublicationType::Published,
        })
    }

    pub fn unpublish_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .interaction_class_mut(class)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(format!("{class:?}")))?;
        mirror.published = false;
        self.send(RtiMsg::ChangeInteractionClassPublication {
            federation: federation_handle,
            interaction_class: class,
            publication: PublicationType::Unpublished,
        })
    }

    pub fn subscribe_interaction_class(
        &mut self,
        class: InteractionClassHandle,
        active: bool,
    ) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let subscription = if active {
            SubscriptionType::SubscribedActive
        } else {
            SubscriptionType::SubscribedPassive
        };
        let mirror = federation
            .interaction_class_mut(class)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(format!("{class:?}")))?;
        mirror.subscribed = subscription;
        self.send(RtiMsg::ChangeInteractionClassSubscription {
            federation: federation_handle,
            interaction_class: class,
            subscription,
        })
    }

    pub fn unsubscribe_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let mirror = federation
            .interaction_class_mut(class)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(format!("{class:?}")))?;
        mirror.subscribed = SubscriptionType::Unsubscribed;
        self.send(RtiMsg::ChangeInteractionClassSubscription {
            federation: federation_handle,
            interaction_class: class,
            subscription: SubscriptionType::Unsubscribed,
        })
    }
}

// ---------------------------------------------------------------------------
// Object management

impl Ambassador {
    /// Reserve an object instance name. The outcome arrives as a name
    /// reservation callback; a failure is final.
    pub async fn reserve_object_instance_name(&mut self, name: &str) -> Result<(), RtiError> {
        if name.is_empty() || name.starts_with("HLA") {
            return Err(RtiError::IllegalName(name.to_string()));
        }
        let federation = self.joined()?;
        let msg = RtiMsg::ReserveObjectInstanceNameRequest {
            federation: federation.federation,
            federate: federation.federate,
            name: name.to_string(),
        };
        self.send(msg)?;

        let expected = name.to_string();
        self.rendezvous(move |ambassador, msg| match &msg {
            RtiMsg::ReserveObjectInstanceNameResponse { name, .. } if *name == expected => {
                ambassador.process_message(msg);
                Some(())
            }
            _ => {
                ambassador.process_message(msg);
                None
            }
        })
        .await
    }

    /// Reserve several names at once, all-or-nothing.
    pub async fn reserve_multiple_object_instance_names(
        &mut self,
        names: &[String],
    ) -> Result<(), RtiError> {
        for name in names {
            if name.is_empty() || name.starts_with("HLA") {
                return Err(RtiError::IllegalName(name.clone()));
            }
        }
        let federation = self.joined()?;
        let msg = RtiMsg::ReserveMultipleObjectInstanceNameRequest {
            federation: federation.federation,
            federate: federation.federate,
            names: names.to_vec(),
        };
        self.send(msg)?;

        let expected = names.to_vec();
        self.rendezvous(move |ambassador, msg| match &msg {
            RtiMsg::ReserveMultipleObjectInstanceNameResponse { names, .. }
                if *names == expected =>
            {
                ambassador.process_message(msg);
                Some(())
            }
            _ => {
                ambassador.process_message(msg);
                None
            }
        })
        .await
    }

    async fn take_pooled_handle(&mut self) -> Result<(ObjectInstanceHandle, String), RtiError> {
        if let Some(pair) = self.joined_mut()?.handle_pool.pop_front() {
            return Ok(pair);
        }
        let federation = self.joined()?;
        let msg = RtiMsg::ObjectInstanceHandlesRequest {
            federation: federation.federation,
            federate: federation.federate,
            count: HANDLE_POOL_SIZE,
        };
        self.send(msg)?;
        self.rendezvous(|ambassador, msg| {
            let is_pool = matches!(&msg, RtiMsg::ObjectInstanceHandlesResponse { .. });
            ambassador.process_message(msg);
            is_pool.then_some(())
        })
        .await?;
        self.joined_mut()?
            .handle_pool
            .pop_front()
            .ok_or_else(|| RtiError::ResourceError("no object instance handles left".into()))
    }

    /// Register an object instance under an RTI-chosen name.
    pub async fn register_object_instance(
        &mut self,
        class: ObjectClassHandle,
    ) -> Result<ObjectInstanceHandle, RtiError> {
        let (handle, name) = self.prepare_registration(class, None).await?;
        self.finish_registration(class, handle, name)?;
        Ok(handle)
    }

    /// Register an object instance under a previously reserved name.
    pub async fn register_object_instance_with_name(
        &mut self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<ObjectInstanceHandle, RtiError> {
        let (handle, name) = self.prepare_registration(class, Some(name)).await?;
        self.finish_registration(class, handle, name)?;
        Ok(handle)
    }

    async fn prepare_registration(
        &mut self,
        class: ObjectClassHandle,
        name: Option<&str>,
    ) -> Result<(ObjectInstanceHandle, String), RtiError> {
        let federation = self.joined()?;
        let mirror = federation
            .object_class(class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{class:?}")))?;
        if !mirror.is_published() {
            return Err(RtiError::ObjectClassNotPublished(mirror.name.clone()));
        }
        if let Some(name) = name {
            if !federation.reserved_names.contains(name) {
                return Err(RtiError::ObjectInstanceNameNotReserved(name.to_string()));
            }
            if federation.instances_by_name.contains_key(name) {
                return Err(RtiError::ObjectInstanceNameInUse(name.to_string()));
            }
        }

        let (handle, pooled_name) = self.take_pooled_handle().await?;
        match name {
            Some(name) => {
                let federation = self.joined_mut()?;
                federation.reserved_names.remove(name);
                // The pooled name stays reserved upstream until resign.
                federation.reserved_names.insert(pooled_name);
                Ok((handle, name.to_string()))
            }
            None => Ok((handle, pooled_name)),
        }
    }

    fn finish_registration(
        &mut self,
        class: ObjectClassHandle,
        handle: ObjectInstanceHandle,
        name: String,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let owned: BTreeSet<AttributeHandle> = federation
            .object_class(class)
            .map(|mirror| mirror.published.clone())
            .unwrap_or_default();

        self.send(RtiMsg::InsertObjectInstance(InsertObjectInstance {
            federation: federation_handle,
            instance: handle,
            object_class: class,
            name: name.clone(),
            owned_attributes: owned.iter().copied().collect(),
        }))?;

        self.joined_mut()?.insert_instance(KnownInstance {
            handle,
            name,
            registered_class: class,
            known_class: class,
            owned_attributes: owned,
        });
        Ok(())
    }

    pub fn object_instance_handle_by_name(
        &self,
        name: &str,
    ) -> Result<ObjectInstanceHandle, RtiError> {
        self.joined()?
            .instance_by_name(name)
            .map(|instance| instance.handle)
            .ok_or_else(|| RtiError::ObjectInstanceNotKnown(name.to_string()))
    }

    /// Send an attribute update, partitioned per transportation type.
    pub fn update_attribute_values(
        &mut self,
        instance: ObjectInstanceHandle,
        attribute_values: Vec<AttributeValue>,
        tag: Payload,
    ) -> Result<(), RtiError> {
        let passels = self.partition_update(instance, &attribute_values, None)?;
        self.send_update_passels(instance, passels, tag, None)
    }

    /// Send a timestamped attribute update. Attributes whose order type is
    /// timestamp go out timestamp-ordered when this federate regulates;
    /// everything else degrades to receive order. Partitioned by
    /// `(transportation, order)` into up to four messages.
    pub fn update_attribute_values_with_time(
        &mut self,
        instance: ObjectInstanceHandle,
        attribute_values: Vec<AttributeValue>,
        tag: Payload,
        time: LogicalTime,
    ) -> Result<MessageRetractionHandle, RtiError> {
        let time_manager = self.time.as_ref().ok_or(RtiError::FederateNotExecutionMember)?;
        time_manager.validate_outgoing_timestamp(time)?;

        let passels = self.partition_update(instance, &attribute_values, Some(time))?;
        let retraction = self.time_mut()?.next_retraction_handle();
        self.send_update_passels(instance, passels, tag, Some((time, retraction)))?;
        Ok(retraction)
    }

    /// Group attribute values by `(transportation, timestamp ordered?)`.
    fn partition_update(
        &self,
        instance: ObjectInstanceHandle,
        attribute_values: &[AttributeValue],
        time: Option<LogicalTime>,
    ) -> Result<Vec<(TransportationType, bool, Vec<AttributeValue>)>, RtiError> {
        let federation = self.joined()?;
        let known = federation
            .instance(instance)
            .ok_or_else(|| RtiError::ObjectInstanceNotKnown(format!("{instance:?}")))?;
        let mirror = federation
            .object_class(known.registered_class)
            .ok_or_else(|| RtiError::ObjectClassNotDefined(format!("{:?}", known.registered_class)))?;

        let timestamped_allowed =
            time.is_some() && self.time.as_ref().is_some_and(TimeManager::is_regulating);

        let mut passels: Vec<(TransportationType, bool, Vec<AttributeValue>)> = Vec::new();
        for value in attribute_values {
            if !known.owned_attributes.contains(&value.attribute) {
                return Err(RtiError::AttributeNotOwned(format!("{:?}", value.attribute)));
            }
            let attribute = mirror
                .attribute(value.attribute)
                .ok_or_else(|| RtiError::AttributeNotDefined(format!("{:?}", value.attribute)))?;
            let timestamped = timestamped_allowed && attribute.order_type == OrderType::Timestamp;
            let position = passels.iter().position(|(transportation, ordered, _)| {
                *transportation == attribute.transportation && *ordered == timestamped
            });
            match position {
                Some(index) => passels[index].2.push(value.clone()),
                None => passels.push((attribute.transportation, timestamped, vec![value.clone()])),
            }
        }
        Ok(passels)
    }

    fn send_update_passels(
        &mut self,
        instance: ObjectInstanceHandle,
        passels: Vec<(TransportationType, bool, Vec<AttributeValue>)>,
        tag: Payload,
        time: Option<(LogicalTime, MessageRetractionHandle)>,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;

        for (transportation, timestamped, values) in passels {
            let msg = match (timestamped, time) {
                (true, Some((timestamp, retraction))) => {
                    RtiMsg::TimeStampedAttributeUpdate(accord_model::TimeStampedAttributeUpdate {
                        federation: federation_handle,
                        federate,
                        instance,
                        attribute_values: values,
                        tag: tag.clone(),
                        transportation,
                        timestamp: timestamp.to_payload(),
                        retraction,
                    })
                }
                _ => RtiMsg::AttributeUpdate(accord_model::AttributeUpdate {
                    federation: federation_handle,
                    federate,
                    instance,
                    attribute_values: values,
                    tag: tag.clone(),
                    transportation,
                }),
            };
            self.send(msg)?;
        }
        Ok(())
    }

    /// Send an interaction of `class` in receive order.
    pub fn send_interaction(
        &mut self,
        class: InteractionClassHandle,
        parameter_values: Vec<ParameterValue>,
        tag: Payload,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let mirror = federation
            .interaction_class(class)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(format!("{class:?}")))?;
        if !mirror.published {
            return Err(RtiError::InteractionClassNotPublished(mirror.name.clone()));
        }
        let msg = RtiMsg::Interaction(accord_model::Interaction {
            federation: federation.federation,
            federate: federation.federate,
            interaction_class: class,
            parameter_values,
            tag,
            transportation: mirror.transportation,
        });
        self.send(msg)
    }

    /// Send a timestamped interaction; timestamp order applies when the
    /// class orders by timestamp and this federate regulates.
    pub fn send_interaction_with_time(
        &mut self,
        class: InteractionClassHandle,
        parameter_values: Vec<ParameterValue>,
        tag: Payload,
        time: LogicalTime,
    ) -> Result<MessageRetractionHandle, RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        let mirror = federation
            .interaction_class(class)
            .ok_or_else(|| RtiError::InteractionClassNotDefined(format!("{class:?}")))?;
        if !mirror.published {
            return Err(RtiError::InteractionClassNotPublished(mirror.name.clone()));
        }
        let transportation = mirror.transportation;
        let timestamped = mirror.order_type == OrderType::Timestamp;

        let time_manager = self.time.as_ref().ok_or(RtiError::FederateNotExecutionMember)?;
        time_manager.validate_outgoing_timestamp(time)?;
        let regulating = time_manager.is_regulating();
        let retraction = self.time_mut()?.next_retraction_handle();

        let msg = if timestamped && regulating {
            RtiMsg::TimeStampedInteraction(accord_model::TimeStampedInteraction {
                federation: federation_handle,
                federate,
                interaction_class: class,
                parameter_values,
                tag,
                transportation,
                timestamp: time.to_payload(),
                retraction,
            })
        } else {
            RtiMsg::Interaction(accord_model::Interaction {
                federation: federation_handle,
                federate,
                interaction_class: class,
                parameter_values,
                tag,
                transportation,
            })
        };
        self.send(msg)?;
        Ok(retraction)
    }

    /// Delete an owned object instance.
    pub fn delete_object_instance(
        &mut self,
        instance: ObjectInstanceHandle,
        tag: Payload,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        let known = federation
            .instance(instance)
            .ok_or_else(|| RtiError::ObjectInstanceNotKnown(format!("{instance:?}")))?;
        if !known
            .owned_attributes
            .contains(&AttributeHandle::PRIVILEGE_TO_DELETE)
        {
            return Err(RtiError::DeletePrivilegeNotHeld(known.name.clone()));
        }

        self.send(RtiMsg::DeleteObjectInstance {
            federation: federation_handle,
            federate,
            instance,
            tag,
        })?;
        self.joined_mut()?.remove_instance(instance);
        Ok(())
    }

    /// Delete an owned object instance at a logical time.
    pub fn delete_object_instance_with_time(
        &mut self,
        instance: ObjectInstanceHandle,
        tag: Payload,
        time: LogicalTime,
    ) -> Result<MessageRetractionHandle, RtiError> {
        let time_manager = self.time.as_ref().ok_or(RtiError::FederateNotExecutionMember)?;
        time_manager.validate_outgoing_timestamp(time)?;
        let regulating = time_manager.is_regulating();

        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        let known = federation
            .instance(instance)
            .ok_or_else(|| RtiError::ObjectInstanceNotKnown(format!("{instance:?}")))?;
        if !known
            .owned_attributes
            .contains(&AttributeHandle::PRIVILEGE_TO_DELETE)
        {
            return Err(RtiError::DeletePrivilegeNotHeld(known.name.clone()));
        }

        let retraction = self.time_mut()?.next_retraction_handle();
        let msg = if regulating {
            RtiMsg::TimeStampedDeleteObjectInstance {
                federation: federation_handle,
                federate,
                instance,
                tag,
                timestamp: time.to_payload(),
                retraction,
            }
        } else {
            RtiMsg::DeleteObjectInstance {
                federation: federation_handle,
                federate,
                instance,
                tag,
            }
        };
        self.send(msg)?;
        self.joined_mut()?.remove_instance(instance);
        Ok(retraction)
    }

    pub fn request_attribute_value_update(
        &mut self,
        instance: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: Payload,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        if federation.instance(instance).is_none() {
            return Err(RtiError::ObjectInstanceNotKnown(format!("{instance:?}")));
        }
        let msg = RtiMsg::RequestAttributeUpdate {
            federation: federation.federation,
            instance,
            attributes,
            tag,
        };
        self.send(msg)
    }

    pub fn request_class_attribute_value_update(
        &mut self,
        class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        tag: Payload,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        if federation.object_class(class).is_none() {
            return Err(RtiError::ObjectClassNotDefined(format!("{class:?}")));
        }
        let msg = RtiMsg::RequestClassAttributeUpdate {
            federation: federation.federation,
            object_class: class,
            attributes,
            tag,
        };
        self.send(msg)
    }
}

// ---------------------------------------------------------------------------
// Synchronization points

impl Ambassador {
    /// Register a synchronization label. An empty `federates` set means all
    /// currently joined federates participate. The outcome arrives as a
    /// registration callback, the label itself as an announcement.
    pub fn register_federation_synchronization_point(
        &mut self,
        label: &str,
        tag: Payload,
        federates: Vec<FederateHandle>,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let msg = RtiMsg::RegisterFederationSynchronizationPoint {
            federation: federation.federation,
            federate: federation.federate,
            label: label.to_string(),
            tag,
            federates,
        };
        self.send(msg)
    }

    pub fn synchronization_point_achieved(
        &mut self,
        label: &str,
        successful: bool,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        if !federation.announced_labels.contains(label) {
            return Err(RtiError::SynchronizationPointLabelNotAnnounced(
                label.to_string(),
            ));
        }
        let msg = RtiMsg::SynchronizationPointAchieved {
            federation: federation.federation,
            federate: federation.federate,
            label: label.to_string(),
            successful,
        };
        self.send(msg)
    }
}

// ---------------------------------------------------------------------------
// Regions

impl Ambassador {
    /// Create a region over `dimensions`. The returned handle embeds this
    /// federate, so no global region registry is needed.
    pub fn create_region(
        &mut self,
        dimensions: BTreeSet<DimensionHandle>,
    ) -> Result<RegionHandle, RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        let local = federation.allocate_region(dimensions.clone())?;
        let region = RegionHandle::new(federate, local);
        self.send(RtiMsg::InsertRegion {
            federation: federation_handle,
            region,
            dimensions: dimensions.into_iter().collect(),
        })?;
        Ok(region)
    }

    /// Commit new range bounds for a region this federate created.
    pub fn commit_region_modifications(
        &mut self,
        region: RegionHandle,
        bounds: Vec<RangeBounds>,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        if region.federate() != federation.federate {
            return Err(RtiError::RegionNotCreatedByThisFederate);
        }
        if !federation.regions.contains_key(&region.local()) {
            return Err(RtiError::InvalidRegion);
        }
        let msg = RtiMsg::CommitRegion {
            federation: federation.federation,
            region,
            bounds,
        };
        self.send(msg)
    }

    pub fn delete_region(&mut self, region: RegionHandle) -> Result<(), RtiError> {
        let federation = self.joined_mut()?;
        let federation_handle = federation.federation;
        if region.federate() != federation.federate {
            return Err(RtiError::RegionNotCreatedByThisFederate);
        }
        if federation.regions.remove(&region.local()).is_none() {
            return Err(RtiError::InvalidRegion);
        }
        self.send(RtiMsg::EraseRegion {
            federation: federation_handle,
            region,
        })
    }
}

// ---------------------------------------------------------------------------
// Time management

impl Ambassador {
    pub fn enable_time_regulation(
        &mut self,
        lookahead: LogicalTimeInterval,
    ) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        let others: BTreeSet<FederateHandle> = federation
            .joined_federates
            .keys()
            .copied()
            .filter(|handle| *handle != federate)
            .collect();

        let time = self.time.as_mut().ok_or(RtiError::FederateNotExecutionMember)?;
        let (proposed, commit_id, actions) = time.enable_regulation(lookahead, others)?;
        self.send(RtiMsg::EnableTimeRegulationRequest {
            federation: federation_handle,
            federate,
            timestamp: proposed.to_payload(),
            commit_id,
        })?;
        self.apply_time_actions(actions);
        Ok(())
    }

    pub fn disable_time_regulation(&mut self) -> Result<(), RtiError> {
        let federation = self.joined()?;
        let federation_handle = federation.federation;
        let federate = federation.federate;
        self.time_mut()?.disable_regulation()?;
        self.send(RtiMsg::DisableTimeRegulationRequest {
            federation: federation_handle,
            federate,
        })
    }

    pub fn enable_time_constrained(&mut self) -> Result<(), RtiError> {
        let actions = self.time_mut()?.enable_constrained()?;
        self.apply_time_actions(actions);
        Ok(())
    }

    pub fn disable_time_constrained(&mut self) -> Result<(), RtiError> {
        let actions = self.time_mut()?.disable_constrained()?;
        self.apply_time_actions(actions);
        Ok(())
    }

    pub fn enable_asynchronous_delivery(&mut self) -> Result<(), RtiError> {
        let actions = self.time_mut()?.set_asynchronous_delivery(true)?;
        self.apply_time_actions(actions);
        Ok(())
    }

    pub fn disable_asynchronous_delivery(&mut self) -> Result<(), RtiError> {
        let actions = self.time_mut()?.set_asynchronous_delivery(false)?;
        self.apply_time_actions(actions);
        Ok(())
    }

    pub fn time_advance_request(&mut self, time: LogicalTime) -> Result<(), RtiError> {
        self.advance(AdvanceMode::TimeAdvanceRequest, time)
    }

    pub fn time_advance_request_available(&mut self, time: LogicalTime) -> Result<(), RtiError> {
        self.advance(AdvanceMode::TimeAdvanceRequestAvailable, time)
    }

    pub fn next_message_request(&mut self, time: LogicalTime) -> Result<(), RtiError> {
        self.advance(AdvanceMode::NextMessageRequest, time)
    }

    pub fn next_message_request_available(&mut self, time: LogicalTime) -> Result<(), RtiError> {
        self.advance(AdvanceMode::NextMessageRequestAvailable, time)
    }

    pub fn flush_queue_request(&mut self, time: LogicalTime) -> Result<(), RtiError> {
        self.advance(AdvanceMode::FlushQueueRequest, time)
    }

    fn advance(&mut self, mode: AdvanceMode, time: LogicalTime) -> Result<(), RtiError> {
        self.process_messages();
        let actions = self.time_mut()?.advance_request(mode, time)?;
        self.apply_time_actions(actions);
        Ok(())
    }

    pub fn query_logical_time(&self) -> Result<LogicalTime, RtiError> {
        Ok(self
            .time
            .as_ref()
            .ok_or(RtiError::FederateNotExecutionMember)?
            .logical_time())
    }

    /// Greatest available logical time, when any other federate regulates.
    pub fn query_galt(&self) -> Result<Option<LogicalTime>, RtiError> {
        Ok(self
            .time
            .as_ref()
            .ok_or(RtiError::FederateNotExecutionMember)?
            .galt())
    }

    /// Lowest incoming timestamp of the TSO queue.
    pub fn query_lits(&self) -> Result<Option<LogicalTime>, RtiError> {
        Ok(self
            .time
            .as_ref()
            .ok_or(RtiError::FederateNotExecutionMember)?
            .lits())
    }

    pub fn query_lookahead(&self) -> Result<LogicalTimeInterval, RtiError> {
        Ok(self
            .time
            .as_ref()
            .ok_or(RtiError::FederateNotExecutionMember)?
            .lookahead())
    }

    /// Retract a timestamped message.
    ///
    /// Not supported: retraction handles are allocated and carried on the
    /// wire, but retraction itself is left unimplemented.
    pub fn retract(&mut self, _retraction: MessageRetractionHandle) -> Result<(), RtiError> {
        Err(RtiError::NotSupported("message retraction"))
    }
}
