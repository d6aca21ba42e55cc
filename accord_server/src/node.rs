//! The server node: a multi-federation container routing protocol messages
//! between its connects.
//!
//! A node with no parent connect is the root server and arbitrates all
//! federation lifecycle requests. Child nodes forward lifecycle requests
//! upward and track the root's decisions; publish/subscribe and data
//! messages propagate by the decision rules of [`crate::pubsub`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use accord_core::{
    AttributeHandle, ConnectHandle, FederateHandle, FederationHandle, HandleAllocator,
    InteractionClassHandle, ObjectClassHandle, ObjectInstanceHandle, Payload, RtiError,
    TIME_FACTORY_FLOAT64,
};
use accord_model::{
    standard_module, AttributeUpdate, ConnectKind, CreateFederationExecutionRequest,
    CreateFederationExecutionResponse, CreateFederationExecutionStatus,
    DestroyFederationExecutionRequest, DestroyFederationExecutionResponse,
    DestroyFederationExecutionStatus, InsertFederationExecution, InsertObjectInstance,
    JoinFederationExecutionRequest, JoinFederationExecutionResponse, JoinFederationExecutionStatus,
    LowerBoundCommitType, PublicationType, ResignAction, RtiMsg, SubscriptionType,
    TimeStampedAttributeUpdate,
};

use crate::connect::{ConnectData, MessageSender};
use crate::federation::Federation;
use crate::object_class::{update_cumulative_subscription, SubscriptionEffects};
use crate::pubsub::Propagation;
use crate::region::Region;
use crate::sync::Synchronization;
use crate::time::CommitRecord;

/// Server options of one node.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Human-readable node name, reported in the connect handshake.
    pub name: String,
    /// Whether federates behind newly accepted connects may become time
    /// regulating.
    pub permit_time_regulation: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "accord-rti".into(),
            permit_time_regulation: true,
        }
    }
}

/// Requests forwarded to the parent whose responses carry no routable
/// federate yet; answered strictly in order per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Create,
    Destroy,
    Enumerate,
    Join,
}

#[derive(Debug)]
pub struct ServerNode {
    options: ServerOptions,
    connects: BTreeMap<ConnectHandle, ConnectData>,
    connect_allocator: HandleAllocator<ConnectHandle>,
    parent: Option<ConnectHandle>,
    federations: BTreeMap<FederationHandle, Federation>,
    federation_names: BTreeMap<String, FederationHandle>,
    federation_allocator: HandleAllocator<FederationHandle>,
    pending: VecDeque<(PendingKind, ConnectHandle)>,
}

impl ServerNode {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            connects: BTreeMap::new(),
            connect_allocator: HandleAllocator::new(),
            parent: None,
            federations: BTreeMap::new(),
            federation_names: BTreeMap::new(),
            federation_allocator: HandleAllocator::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn federation(&self, handle: FederationHandle) -> Option<&Federation> {
        self.federations.get(&handle)
    }

    pub fn federation_by_name(&self, name: &str) -> Option<&Federation> {
        self.federation_names
            .get(name)
            .and_then(|handle| self.federations.get(handle))
    }

    /// Register a new child connect.
    pub fn insert_connect(
        &mut self,
        name: String,
        kind: ConnectKind,
        sender: MessageSender,
    ) -> Result<ConnectHandle, RtiError> {
        let handle = self.connect_allocator.get()?;
        self.connects.insert(
            handle,
            ConnectData::new(
                handle,
                name,
                kind,
                sender,
                self.options.permit_time_regulation,
            ),
        );
        Ok(handle)
    }

    /// Register the connect toward the parent server. At most one connect
    /// may be the parent connect.
    pub fn insert_parent_connect(
        &mut self,
        name: String,
        sender: MessageSender,
    ) -> Result<ConnectHandle, RtiError> {
        if self.parent.is_some() {
            return Err(RtiError::RtiInternalError("parent connect exists".into()));
        }
        let handle = self.insert_connect(name, ConnectKind::Node, sender)?;
        self.parent = Some(handle);
        Ok(handle)
    }

    fn connect_kind(&self, connect: ConnectHandle) -> Option<ConnectKind> {
        self.connects.get(&connect).map(|data| data.kind)
    }

    fn send(&self, connect: ConnectHandle, msg: RtiMsg) {
        if let Some(data) = self.connects.get(&connect) {
            data.send(msg);
        }
    }

    fn send_all(&self, connects: &[ConnectHandle], msg: RtiMsg) {
        if let Some((last, rest)) = connects.split_last() {
            for connect in rest {
                self.send(*connect, msg.clone());
            }
            self.send(*last, msg);
        }
    }

    fn pop_pending(&mut self, kind: PendingKind) -> Option<ConnectHandle> {
        let position = self.pending.iter().position(|(k, _)| *k == kind)?;
        self.pending.remove(position).map(|(_, connect)| connect)
    }

    /// Process one message from one connect. All outgoing traffic is pushed
    /// into the per-connect senders.
    #[tracing::instrument(level = "debug", skip(self, msg), fields(node = %self.options.name))]
    pub fn dispatch(&mut self, from: ConnectHandle, msg: RtiMsg) {
        use RtiMsg::*;
        match msg {
            ConnectRequest { name, kind } => {
                if let Some(data) = self.connects.get_mut(&from) {
                    data.name = name;
                    data.kind = kind;
                }
                self.send(
                    from,
                    ConnectResponse {
                        node_name: self.options.name.clone(),
                    },
                );
            }
            ConnectResponse { .. } => {}
            ConnectionLost { .. } => self.erase_connect(from),

            CreateFederationExecutionRequest(request) => self.handle_create_request(from, request),
            CreateFederationExecutionResponse(response) => {
                if let Some(target) = self.pop_pending(PendingKind::Create) {
                    self.send(target, CreateFederationExecutionResponse(response));
                }
            }
            DestroyFederationExecutionRequest(request) => {
                self.handle_destroy_request(from, request)
            }
            DestroyFederationExecutionResponse(response) => {
                if let Some(target) = self.pop_pending(PendingKind::Destroy) {
                    self.send(target, DestroyFederationExecutionResponse(response));
                }
            }
            EnumerateFederationExecutionsRequest => {
                if let Some(parent) = self.parent {
                    self.pending.push_back((PendingKind::Enumerate, from));
                    self.send(parent, EnumerateFederationExecutionsRequest);
                } else {
                    let federations = self
                        .federations
                        .values()
                        .map(|federation| {
                            (
                                federation.name.clone(),
                                federation.logical_time_factory_name.clone(),
                            )
                        })
                        .collect();
                    self.send(from, EnumerateFederationExecutionsResponse { federations });
                }
            }
            EnumerateFederationExecutionsResponse { federations } => {
                if let Some(target) = self.pop_pending(PendingKind::Enumerate) {
                    self.send(target, EnumerateFederationExecutionsResponse { federations });
                }
            }

            InsertFederationExecution(insert) => self.handle_insert_federation(from, insert),
            EraseFederationExecution { federation } => self.handle_erase_federation(from, federation),
            ReleaseFederationHandle { .. } => {}
            InsertModules {
                federation,
                fom_modules,
            } => {
                // Every connect needs the new modules: ambassadors decode
                // callbacks against them, child nodes track the handles.
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    federation_data.insert_resolved_modules(&fom_modules);
                    let targets = federation_data.connects_except(from);
                    self.send_all(
                        &targets,
                        InsertModules {
                            federation,
                            fom_modules,
                        },
                    );
                }
            }

            JoinFederationExecutionRequest(request) => self.handle_join_request(from, request),
            JoinFederationExecutionResponse(response) => self.handle_join_response(response),
            JoinFederateNotify {
                federation,
                federate,
                federate_name,
                federate_type,
            } => self.handle_join_notify(from, federation, federate, federate_name, federate_type),
            ResignFederationExecutionLeafRequest {
                federation,
                federate,
                resign_action,
            } => self.handle_resign(from, federation, federate, resign_action),
            ResignFederateNotify {
                federation,
                federate,
            } => self.handle_resign_notify(from, federation, federate),

            RegisterFederationSynchronizationPoint {
                federation,
                federate,
                label,
                tag,
                federates,
            } => self.handle_register_sync(from, federation, federate, label, tag, federates),
            RegisterFederationSynchronizationPointResponse {
                federation,
                federate,
                label,
                success,
            } => self.route_to_federate(
                federation,
                federate,
                RegisterFederationSynchronizationPointResponse {
                    federation,
                    federate,
                    label,
                    success,
                },
            ),
            AnnounceSynchronizationPoint {
                federation,
                label,
                tag,
                add_joining_federates,
                federates,
            } => self.handle_announce_sync(
                from,
                federation,
                label,
                tag,
                add_joining_federates,
                federates,
            ),
            SynchronizationPointAchieved {
                federation,
                federate,
                label,
                successful,
            } => self.handle_sync_achieved(from, federation, federate, label, successful),
            FederationSynchronized {
                federation,
                label,
                federates,
            } => self.handle_federation_synchronized(from, federation, label, federates),

            ChangeObjectClassPublication {
                federation,
                object_class,
                attributes,
                publication,
            } => self.handle_object_publication(from, federation, object_class, attributes, publication),
            ChangeObjectClassSubscription {
                federation,
                object_class,
                attributes,
                subscription,
            } => self.handle_object_subscription(from, federation, object_class, attributes, subscription),
            ChangeInteractionClassPublication {
                federation,
                interaction_class,
                publication,
            } => self.handle_interaction_publication(from, federation, interaction_class, publication),
            ChangeInteractionClassSubscription {
                federation,
                interaction_class,
                subscription,
            } => self.handle_interaction_subscription(from, federation, interaction_class, subscription),
            RegistrationForObjectClass {
                federation,
                object_class,
                start,
            } => {
                // Relay toward the publishers behind this node.
                let Some(federation_data) = self.federations.get(&federation) else {
                    return;
                };
                let Some(class) = federation_data.object_classes.get(object_class) else {
                    return;
                };
                let targets: Vec<_> = class
                    .attribute(AttributeHandle::PRIVILEGE_TO_DELETE)
                    .map(|attribute| {
                        attribute
                            .pubsub
                            .published_connects()
                            .iter()
                            .copied()
                            .filter(|connect| *connect != from)
                            .collect()
                    })
                    .unwrap_or_default();
                self.send_all(
                    &targets,
                    RegistrationForObjectClass {
                        federation,
                        object_class,
                        start,
                    },
                );
            }
            TurnInteractionsOn {
                federation,
                interaction_class,
                on,
            } => {
                let Some(federation_data) = self.federations.get(&federation) else {
                    return;
                };
                let Some(class) = federation_data.interaction_classes.get(interaction_class)
                else {
                    return;
                };
                let targets: Vec<_> = class
                    .pubsub
                    .published_connects()
                    .iter()
                    .copied()
                    .filter(|connect| *connect != from)
                    .collect();
                self.send_all(
                    &targets,
                    TurnInteractionsOn {
                        federation,
                        interaction_class,
                        on,
                    },
                );
            }

            ReserveObjectInstanceNameRequest {
                federation,
                federate,
                name,
            } => self.handle_reserve_name(from, federation, federate, vec![name], false),
            ReserveMultipleObjectInstanceNameRequest {
                federation,
                federate,
                names,
            } => self.handle_reserve_name(from, federation, federate, names, true),
            ReserveObjectInstanceNameResponse {
                federation,
                federate,
                name,
                success,
            } => self.route_to_federate(
                federation,
                federate,
                ReserveObjectInstanceNameResponse {
                    federation,
                    federate,
                    name,
                    success,
                },
            ),
            ReserveMultipleObjectInstanceNameResponse {
                federation,
                federate,
                names,
                success,
            } => self.route_to_federate(
                federation,
                federate,
                ReserveMultipleObjectInstanceNameResponse {
                    federation,
                    federate,
                    names,
                    success,
                },
            ),
            ReleaseMultipleObjectInstanceNameHandlePairs { federation, pairs } => {
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    for (handle, name) in &pairs {
                        if !federation_data.instances.contains_key(handle) {
                            federation_data.release_reserved_pair(*handle, name);
                        }
                    }
                }
                if let Some(parent) = self.parent {
                    self.send(
                        parent,
                        ReleaseMultipleObjectInstanceNameHandlePairs { federation, pairs },
                    );
                }
            }
            ObjectInstanceHandlesRequest {
                federation,
                federate,
                count,
            } => self.handle_instance_handles_request(from, federation, federate, count),
            ObjectInstanceHandlesResponse {
                federation,
                federate,
                pairs,
            } => {
                // Track the root's allocations on the way down.
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    for (handle, _name) in &pairs {
                        federation_data.instance_allocator.take(*handle);
                    }
                }
                self.route_to_federate(
                    federation,
                    federate,
                    ObjectInstanceHandlesResponse {
                        federation,
                        federate,
                        pairs,
                    },
                );
            }

            InsertObjectInstance(insert) => self.handle_insert_object_instance(from, insert),
            DeleteObjectInstance {
                federation,
                federate,
                instance,
                tag,
            } => self.handle_delete_instance(
                from,
                federation,
                instance,
                DeleteObjectInstance {
                    federation,
                    federate,
                    instance,
                    tag,
                },
            ),
            TimeStampedDeleteObjectInstance {
                federation,
                federate,
                instance,
                tag,
                timestamp,
                retraction,
            } => self.handle_delete_instance(
                from,
                federation,
                instance,
                TimeStampedDeleteObjectInstance {
                    federation,
                    federate,
                    instance,
                    tag,
                    timestamp,
                    retraction,
                },
            ),
            AttributeUpdate(update) => self.handle_attribute_update(from, update),
            TimeStampedAttributeUpdate(update) => {
                self.handle_timestamped_attribute_update(from, update)
            }
            Interaction(interaction) => {
                let targets =
                    self.interaction_targets(from, interaction.federation, interaction.interaction_class);
                self.send_all(&targets, Interaction(interaction));
            }
            TimeStampedInteraction(interaction) => {
                let targets =
                    self.interaction_targets(from, interaction.federation, interaction.interaction_class);
                self.send_all(&targets, TimeStampedInteraction(interaction));
            }
            RequestAttributeUpdate {
                federation,
                instance,
                attributes,
                tag,
            } => {
                let targets = self.attribute_owner_targets(from, federation, instance, &attributes);
                self.send_all(
                    &targets,
                    RequestAttributeUpdate {
                        federation,
                        instance,
                        attributes,
                        tag,
                    },
                );
            }
            RequestClassAttributeUpdate {
                federation,
                object_class,
                attributes,
                tag,
            } => {
                let Some(federation_data) = self.federations.get(&federation) else {
                    return;
                };
                let Some(class) = federation_data.object_classes.get(object_class) else {
                    return;
                };
                let mut targets = BTreeSet::new();
                for attribute in &attributes {
                    if let Some(class_attribute) = class.attribute(*attribute) {
                        targets.extend(
                            class_attribute
                                .pubsub
                                .published_connects()
                                .iter()
                                .copied()
                                .filter(|connect| *connect != from),
                        );
                    }
                }
                let targets: Vec<_> = targets.into_iter().collect();
                self.send_all(
                    &targets,
                    RequestClassAttributeUpdate {
                        federation,
                        object_class,
                        attributes,
                        tag,
                    },
                );
            }
            AttributesInScope {
                federation,
                instance,
                attributes,
            } => {
                let targets = self.instance_receiver_targets(from, federation, instance, &attributes);
                self.send_all(
                    &targets,
                    AttributesInScope {
                        federation,
                        instance,
                        attributes,
                    },
                );
            }
            AttributesOutOfScope {
                federation,
                instance,
                attributes,
            } => {
                let targets = self.instance_receiver_targets(from, federation, instance, &attributes);
                self.send_all(
                    &targets,
                    AttributesOutOfScope {
                        federation,
                        instance,
                        attributes,
                    },
                );
            }
            TurnUpdatesOnForInstance {
                federation,
                instance,
                attributes,
                on,
            } => {
                let targets = self.attribute_owner_targets(from, federation, instance, &attributes);
                self.send_all(
                    &targets,
                    TurnUpdatesOnForInstance {
                        federation,
                        instance,
                        attributes,
                        on,
                    },
                );
            }

            InsertRegion {
                federation,
                region,
                dimensions,
            } => {
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    federation_data.regions.insert(
                        region,
                        Region::new(region, from, dimensions.iter().copied().collect()),
                    );
                    let targets = federation_data.connects_except(from);
                    self.send_all(
                        &targets,
                        InsertRegion {
                            federation,
                            region,
                            dimensions,
                        },
                    );
                }
            }
            CommitRegion {
                federation,
                region,
                bounds,
            } => {
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    if let Some(region_data) = federation_data.regions.get_mut(&region) {
                        if let Err(error) = region_data.commit(bounds.clone()) {
                            tracing::warn!(?region, %error, "Rejecting region commit.");
                            return;
                        }
                    }
                    let targets = federation_data.connects_except(from);
                    self.send_all(
                        &targets,
                        CommitRegion {
                            federation,
                            region,
                            bounds,
                        },
                    );
                }
            }
            EraseRegion { federation, region } => {
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    federation_data.regions.remove(&region);
                    let targets = federation_data.connects_except(from);
                    self.send_all(&targets, EraseRegion { federation, region });
                }
            }

            EnableTimeRegulationRequest {
                federation,
                federate,
                timestamp,
                commit_id,
            } => self.handle_enable_time_regulation(from, federation, federate, timestamp, commit_id),
            EnableTimeRegulationResponse {
                federation,
                federate,
                responding_federate,
                timestamp,
                timestamp_valid,
            } => self.route_to_federate(
                federation,
                federate,
                EnableTimeRegulationResponse {
                    federation,
                    federate,
                    responding_federate,
                    timestamp,
                    timestamp_valid,
                },
            ),
            DisableTimeRegulationRequest {
                federation,
                federate,
            } => {
                if let Some(federation_data) = self.federations.get_mut(&federation) {
                    federation_data.erase_time_regulating(federate);
                    let targets = federation_data.connects_except(from);
                    self.send_all(
                        &targets,
                        DisableTimeRegulationRequest {
                            federation,
                            federate,
                        },
                    );
                }
            }
            CommitLowerBoundTimeStamp {
                federation,
                federate,
                timestamp,
                commit_type,
                commit_id,
            } => self.handle_commit_lbts(from, federation, federate, timestamp, commit_type, commit_id),
            CommitLowerBoundTimeStampResponse {
                federation,
                federate,
                commit_id,
            } => self.route_to_federate(
                federation,
                federate,
                CommitLowerBoundTimeStampResponse {
                    federation,
                    federate,
                    commit_id,
                },
            ),
            LockedByNextMessageRequest {
                federation,
                federate,
                timestamp,
            } => {
                if let Some(federation_data) = self.federations.get(&federation) {
                    let targets = federation_data.connects_except(from);
                    self.send_all(
                        &targets,
                        LockedByNextMessageRequest {
                            federation,
                            federate,
                            timestamp,
                        },
                    );
                }
            }
            // Addressed callback messages; deliver toward the federate.
            TimeConstrainedEnabled {
                federation,
                federate,
                timestamp,
            } => self.route_to_federate(
                federation,
                federate,
                TimeConstrainedEnabled {
                    federation,
                    federate,
                    timestamp,
                },
            ),
            TimeRegulationEnabled {
                federation,
                federate,
                timestamp,
            } => self.route_to_federate(
                federation,
                federate,
                TimeRegulationEnabled {
                    federation,
                    federate,
                    timestamp,
                },
            ),
            TimeAdvanceGranted {
                federation,
                federate,
                timestamp,
            } => self.route_to_federate(
                federation,
                federate,
                TimeAdvanceGranted {
                    federation,
                    federate,
                    timestamp,
                },
            ),
        }
    }

    // -- federation lifecycle ----------------------------------------------

    fn handle_create_request(&mut self, from: ConnectHandle, request: CreateFederationExecutionRequest) {
        if let Some(parent) = self.parent {
            self.pending.push_back((PendingKind::Create, from));
            self.send(parent, RtiMsg::CreateFederationExecutionRequest(request));
            return;
        }
        let federation_name = request.federation_name.clone();
        let status = self.create_federation(request);
        self.send(
            from,
            RtiMsg::CreateFederationExecutionResponse(CreateFederationExecutionResponse {
                federation_name,
                status,
            }),
        );
    }

    fn create_federation(
        &mut self,
        request: CreateFederationExecutionRequest,
    ) -> CreateFederationExecutionStatus {
        if self.federation_names.contains_key(&request.federation_name) {
            return CreateFederationExecutionStatus::AlreadyExists;
        }
        if request.logical_time_factory_name != TIME_FACTORY_FLOAT64 {
            return CreateFederationExecutionStatus::CouldNotCreateLogicalTimeFactory;
        }
        let handle = match self.federation_allocator.get() {
            Ok(handle) => handle,
            Err(error) => {
                return CreateFederationExecutionStatus::RtiInternalError(error.to_string())
            }
        };

        let mut federation = Federation::new(
            handle,
            request.federation_name.clone(),
            request.logical_time_factory_name,
        );
        let mut modules = vec![standard_module()];
        modules.extend(request.fom_modules);
        match federation.insert_string_modules(&modules) {
            Ok(_) => {
                tracing::info!(federation = %federation.name, ?handle, "Created federation execution.");
                self.federation_names
                    .insert(request.federation_name, handle);
                self.federations.insert(handle, federation);
                CreateFederationExecutionStatus::Success
            }
            Err(error) => {
                self.federation_allocator.put(handle);
                match error {
                    RtiError::InconsistentFdd(reason) | RtiError::ErrorReadingFdd(reason) => {
                        CreateFederationExecutionStatus::InconsistentFdd(reason)
                    }
                    other => CreateFederationExecutionStatus::RtiInternalError(other.to_string()),
                }
            }
        }
    }

    fn handle_destroy_request(
        &mut self,
        from: ConnectHandle,
        request: DestroyFederationExecutionRequest,
    ) {
        if let Some(parent) = self.parent {
            self.pending.push_back((PendingKind::Destroy, from));
            self.send(parent, RtiMsg::DestroyFederationExecutionRequest(request));
            return;
        }

        let status = match self.federation_names.get(&request.federation_name) {
            None => DestroyFederationExecutionStatus::DoesNotExist,
            Some(&handle) => {
                let federation = self.federations.get(&handle).expect("name map in sync");
                if federation.has_joined_federates() {
                    DestroyFederationExecutionStatus::FederatesCurrentlyJoined
                } else {
                    let targets = federation.all_connects();
                    self.send_all(
                        &targets,
                        RtiMsg::EraseFederationExecution { federation: handle },
                    );
                    self.federations.remove(&handle);
                    self.federation_names.remove(&request.federation_name);
                    self.federation_allocator.put(handle);
                    tracing::info!(federation = %request.federation_name, "Destroyed federation execution.");
                    DestroyFederationExecutionStatus::Success
                }
            }
        };
        self.send(
            from,
            RtiMsg::DestroyFederationExecutionResponse(DestroyFederationExecutionResponse {
                federation_name: request.federation_name,
                status,
            }),
        );
    }

    fn handle_erase_federation(&mut self, from: ConnectHandle, handle: FederationHandle) {
        if Some(from) != self.parent {
            return;
        }
        let Some(federation) = self.federations.remove(&handle) else {
            return;
        };
        self.federation_names.remove(&federation.name);
        self.federation_allocator.put(handle);
        let targets: Vec<_> = federation
            .connects_except(from)
            .into_iter()
            .filter(|connect| self.connect_kind(*connect) == Some(ConnectKind::Node))
            .collect();
        self.send_all(
            &targets,
            RtiMsg::EraseFederationExecution { federation: handle },
        );
        self.send(from, RtiMsg::ReleaseFederationHandle { federation: handle });
    }

    fn handle_insert_federation(&mut self, from: ConnectHandle, insert: InsertFederationExecution) {
        if Some(from) != self.parent {
            tracing::warn!(?from, "InsertFederationExecution from a non-parent connect.");
            return;
        }
        if self.federations.contains_key(&insert.federation) {
            return;
        }
        self.federation_allocator.take(insert.federation);
        let mut federation = Federation::new(
            insert.federation,
            insert.federation_name.clone(),
            insert.logical_time_factory_name,
        );
        federation.insert_resolved_modules(&insert.fom_modules);
        federation.insert_connect(from, true);
        for (federate, name, federate_type) in insert.joined_federates {
            let _ = federation.insert_federate(from, Some(federate), Some(name), federate_type);
        }
        for state in insert.time_regulating {
            federation.insert_time_regulating(
                state.federate,
                from,
                CommitRecord {
                    time_advance_timestamp: state.time_advance_timestamp,
                    next_message_timestamp: state.next_message_timestamp,
                    commit_id: state.commit_id,
                },
            );
        }
        self.federation_names
            .insert(insert.federation_name, insert.federation);
        self.federations.insert(insert.federation, federation);
    }

    // -- join / resign -----------------------------------------------------

    fn handle_join_request(&mut self, from: ConnectHandle, request: JoinFederationExecutionRequest) {
        if let Some(parent) = self.parent {
            self.pending.push_back((PendingKind::Join, from));
            self.send(parent, RtiMsg::JoinFederationExecutionRequest(request));
            return;
        }
        self.handle_join_root(from, request);
    }

    fn join_error_response(
        request: &JoinFederationExecutionRequest,
        status: JoinFederationExecutionStatus,
    ) -> JoinFederationExecutionResponse {
        JoinFederationExecutionResponse {
            federation_name: request.federation_name.clone(),
            status,
            federation: FederationHandle::default(),
            federate: FederateHandle::default(),
            federate_name: String::new(),
            logical_time_factory_name: String::new(),
            fom_modules: Vec::new(),
            joined_federates: Vec::new(),
            time_regulating: Vec::new(),
        }
    }

    fn handle_join_root(&mut self, from: ConnectHandle, request: JoinFederationExecutionRequest) {
        let respond_error = |node: &Self, status| {
            node.send(
                from,
                RtiMsg::JoinFederationExecutionResponse(Self::join_error_response(
                    &request, status,
                )),
            );
        };

        let Some(&federation_handle) = self.federation_names.get(&request.federation_name) else {
            respond_error(
                self,
                JoinFederationExecutionStatus::FederationExecutionDoesNotExist,
            );
            return;
        };
        let federation = self
            .federations
            .get_mut(&federation_handle)
            .expect("name map in sync");

        if request.logical_time_factory_name != federation.logical_time_factory_name {
            respond_error(
                self,
                JoinFederationExecutionStatus::CouldNotCreateLogicalTimeFactory,
            );
            return;
        }
        if let Some(name) = &request.federate_name {
            if federation.is_federate_name_in_use(name) {
                respond_error(self, JoinFederationExecutionStatus::FederateNameAlreadyInUse);
                return;
            }
        }

        // Additional modules merge all-or-nothing; a failed merge leaves no
        // trace of the attempted join.
        let inserted_modules = match federation.insert_string_modules(&request.additional_fom_modules)
        {
            Ok(modules) => modules,
            Err(RtiError::InconsistentFdd(reason)) | Err(RtiError::ErrorReadingFdd(reason)) => {
                respond_error(self, JoinFederationExecutionStatus::InconsistentFdd(reason));
                return;
            }
            Err(other) => {
                respond_error(
                    self,
                    JoinFederationExecutionStatus::RtiInternalError(other.to_string()),
                );
                return;
            }
        };

        let connect_knew_federation = federation.has_connect(from);
        let federate = match federation.insert_federate(
            from,
            None,
            request.federate_name.clone(),
            request.federate_type.clone(),
        ) {
            Ok(federate) => federate,
            Err(error) => {
                respond_error(
                    self,
                    JoinFederationExecutionStatus::RtiInternalError(error.to_string()),
                );
                return;
            }
        };
        federation.insert_connect(from, false);

        let federate_name = federation
            .federates
            .get(&federate)
            .map(|data| data.name.clone())
            .unwrap_or_default();
        tracing::info!(
            federation = %federation.name,
            ?federate,
            name = %federate_name,
            "Federate joined."
        );

        let response = JoinFederationExecutionResponse {
            federation_name: request.federation_name.clone(),
            status: JoinFederationExecutionStatus::Success,
            federation: federation_handle,
            federate,
            federate_name: federate_name.clone(),
            logical_time_factory_name: federation.logical_time_factory_name.clone(),
            fom_modules: federation.module_set.module_list(),
            joined_federates: federation.joined_federates(),
            time_regulating: federation.time_regulating_states(),
        };

        // Pending all-joined synchronization points capture the joiner.
        let mut announcements = Vec::new();
        for (label, sync) in federation.sync_points.iter_mut() {
            if sync.add_joining_federates {
                sync.insert_joining(federate);
                announcements.push(RtiMsg::AnnounceSynchronizationPoint {
                    federation: federation_handle,
                    label: label.clone(),
                    tag: sync.tag.clone(),
                    add_joining_federates: true,
                    federates: vec![federate],
                });
            }
        }

        let other_connects = federation.connects_except(from);
        let insert_federation = InsertFederationExecution {
            federation: federation_handle,
            federation_name: federation.name.clone(),
            logical_time_factory_name: federation.logical_time_factory_name.clone(),
            fom_modules: response.fom_modules.clone(),
            joined_federates: response.joined_federates.clone(),
            time_regulating: response.time_regulating.clone(),
        };

        if !connect_knew_federation && self.connect_kind(from) == Some(ConnectKind::Node) {
            self.send(from, RtiMsg::InsertFederationExecution(insert_federation));
        }
        self.send(from, RtiMsg::JoinFederationExecutionResponse(response));
        for announcement in announcements {
            self.send(from, announcement);
        }

        if !inserted_modules.is_empty() {
            self.send_all(
                &other_connects,
                RtiMsg::InsertModules {
                    federation: federation_handle,
                    fom_modules: inserted_modules,
                },
            );
        }
        self.send_all(
            &other_connects,
            RtiMsg::JoinFederateNotify {
                federation: federation_handle,
                federate,
                federate_name,
                federate_type: request.federate_type,
            },
        );
    }

    fn handle_join_response(&mut self, response: JoinFederationExecutionResponse) {
        let Some(target) = self.pop_pending(PendingKind::Join) else {
            return;
        };
        if response.status != JoinFederationExecutionStatus::Success {
            self.send(target, RtiMsg::JoinFederationExecutionResponse(response));
            return;
        }

        // The parent sent InsertFederationExecution ahead of this response if
        // the federation was new to us; in that case the joining federate is
        // already tracked against the parent connect and only moves here.
        let target_is_node = self.connect_kind(target) == Some(ConnectKind::Node);
        if let Some(federation) = self.federations.get_mut(&response.federation) {
            let connect_knew_federation = federation.has_connect(target);
            let federate_type = response
                .joined_federates
                .iter()
                .find(|(handle, ..)| *handle == response.federate)
                .map(|(_, _, federate_type)| federate_type.clone())
                .unwrap_or_default();
            let _ = federation.insert_federate(
                target,
                Some(response.federate),
                Some(response.federate_name.clone()),
                federate_type,
            );
            federation.insert_connect(target, false);

            if !connect_knew_federation && target_is_node {
                let insert = InsertFederationExecution {
                    federation: response.federation,
                    federation_name: federation.name.clone(),
                    logical_time_factory_name: federation.logical_time_factory_name.clone(),
                    fom_modules: federation.module_set.module_list(),
                    joined_federates: federation.joined_federates(),
                    time_regulating: federation.time_regulating_states(),
                };
                let insert = RtiMsg::InsertFederationExecution(insert);
                if let Some(data) = self.connects.get(&target) {
                    data.send(insert);
                }
            }
        }
        self.send(target, RtiMsg::JoinFederationExecutionResponse(response));
    }

    fn handle_join_notify(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        federate_name: String,
        federate_type: String,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let _ = federation.insert_federate(
            from,
            Some(federate),
            Some(federate_name.clone()),
            federate_type.clone(),
        );
        let targets = federation.connects_except(from);
        self.send_all(
            &targets,
            RtiMsg::JoinFederateNotify {
                federation: federation_handle,
                federate,
                federate_name,
                federate_type,
            },
        );
    }

    fn handle_resign(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        resign_action: ResignAction,
    ) {
        if !self.federations.contains_key(&federation_handle) {
            return;
        }

        // At the federate's own node the resign action turns into regular
        // delete/divest traffic; everywhere else those messages have already
        // been routed ahead of this request.
        if self.connect_kind(from) == Some(ConnectKind::Ambassador) {
            self.execute_resign_action(from, federation_handle, federate, resign_action);
        }

        self.erase_federate_everywhere(federation_handle, federate);

        // Our own subtree hears the resign directly; everyone else hears it
        // from the root's notify broadcast.
        if let Some(federation) = self.federations.get(&federation_handle) {
            let parent = self.parent;
            let targets: Vec<_> = federation
                .connects_except(from)
                .into_iter()
                .filter(|connect| Some(*connect) != parent)
                .collect();
            self.send_all(
                &targets,
                RtiMsg::ResignFederateNotify {
                    federation: federation_handle,
                    federate,
                },
            );
        }
        if let Some(parent) = self.parent {
            self.send(
                parent,
                RtiMsg::ResignFederationExecutionLeafRequest {
                    federation: federation_handle,
                    federate,
                    resign_action,
                },
            );
        }
    }

    fn handle_resign_notify(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
    ) {
        if !self.federations.contains_key(&federation_handle) {
            return;
        }
        self.erase_federate_everywhere(federation_handle, federate);
        if let Some(federation) = self.federations.get(&federation_handle) {
            let targets = federation.connects_except(from);
            self.send_all(
                &targets,
                RtiMsg::ResignFederateNotify {
                    federation: federation_handle,
                    federate,
                },
            );
        }
    }

    /// Turn a resign action into the delete/divest messages it implies, sent
    /// on behalf of the resigning connect.
    fn execute_resign_action(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        resign_action: ResignAction,
    ) {
        let delete_objects = matches!(
            resign_action,
            ResignAction::DeleteObjects
                | ResignAction::DeleteObjectsThenDivest
                | ResignAction::CancelThenDeleteThenDivest
        );
        let divest = matches!(
            resign_action,
            ResignAction::UnconditionallyDivestAttributes
                | ResignAction::DeleteObjectsThenDivest
                | ResignAction::CancelThenDeleteThenDivest
        );

        let Some(federation) = self.federations.get(&federation_handle) else {
            return;
        };
        let owned_instances: Vec<ObjectInstanceHandle> = federation
            .instances
            .values()
            .filter(|instance| instance.owner_connect() == Some(from))
            .map(|instance| instance.handle)
            .collect();

        if delete_objects {
            for instance in owned_instances {
                self.handle_delete_instance(
                    from,
                    federation_handle,
                    instance,
                    RtiMsg::DeleteObjectInstance {
                        federation: federation_handle,
                        federate,
                        instance,
                        tag: Payload::new(),
                    },
                );
            }
        }

        if divest {
            if let Some(federation) = self.federations.get_mut(&federation_handle) {
                for instance in federation.instances.values_mut() {
                    for attribute in instance.attributes_mut() {
                        if attribute.owner == Some(from) {
                            attribute.set_owner(None);
                        }
                    }
                }
            }
        }

        // Tear down the federate's regions.
        let regions: Vec<_> = self
            .federations
            .get(&federation_handle)
            .map(|federation| {
                federation
                    .regions
                    .keys()
                    .copied()
                    .filter(|region| region.federate() == federate)
                    .collect()
            })
            .unwrap_or_default();
        for region in regions {
            let targets = match self.federations.get_mut(&federation_handle) {
                Some(federation) => {
                    federation.regions.remove(&region);
                    federation.connects_except(from)
                }
                None => Vec::new(),
            };
            self.send_all(
                &targets,
                RtiMsg::EraseRegion {
                    federation: federation_handle,
                    region,
                },
            );
        }
    }

    /// Local bookkeeping common to resign requests and notifies.
    fn erase_federate_everywhere(
        &mut self,
        federation_handle: FederationHandle,
        federate: FederateHandle,
    ) {
        let is_root = self.is_root();
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };

        // Pending synchronization points stop waiting for the federate;
        // completing one fires the barrier (root only).
        let mut completed = Vec::new();
        for (label, sync) in federation.sync_points.iter_mut() {
            if sync.remove_federate(federate) && is_root {
                completed.push(label.clone());
            }
        }
        for label in completed {
            self.broadcast_federation_synchronized(federation_handle, &label);
        }

        if let Some(federation) = self.federations.get_mut(&federation_handle) {
            federation.erase_time_regulating(federate);
            federation.erase_federate(federate);
        }
    }

    // -- synchronization points --------------------------------------------

    fn handle_register_sync(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        label: String,
        tag: Payload,
        federates: Vec<FederateHandle>,
    ) {
        if let Some(parent) = self.parent {
            self.send(
                parent,
                RtiMsg::RegisterFederationSynchronizationPoint {
                    federation: federation_handle,
                    federate,
                    label,
                    tag,
                    federates,
                },
            );
            return;
        }

        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let known = federates
            .iter()
            .all(|handle| federation.federates.contains_key(handle));
        let success = known && !federation.sync_points.contains_key(&label);

        self.route_to_federate(
            federation_handle,
            federate,
            RtiMsg::RegisterFederationSynchronizationPointResponse {
                federation: federation_handle,
                federate,
                label: label.clone(),
                success,
            },
        );
        if !success {
            return;
        }

        let federation = self
            .federations
            .get_mut(&federation_handle)
            .expect("still present");
        let sync = Synchronization::new(
            tag.clone(),
            &federates,
            federation.federates.keys().copied(),
        );
        let participants: Vec<_> = sync.participating().iter().copied().collect();
        let add_joining = sync.add_joining_federates;
        federation.sync_points.insert(label.clone(), sync);

        for (connect, connect_federates) in
            self.group_federates_by_connect(federation_handle, &participants)
        {
            self.send(
                connect,
                RtiMsg::AnnounceSynchronizationPoint {
                    federation: federation_handle,
                    label: label.clone(),
                    tag: tag.clone(),
                    add_joining_federates: add_joining,
                    federates: connect_federates,
                },
            );
        }
    }

    fn handle_announce_sync(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        label: String,
        tag: Payload,
        add_joining_federates: bool,
        federates: Vec<FederateHandle>,
    ) {
        if Some(from) != self.parent {
            return;
        }
        for (connect, connect_federates) in
            self.group_federates_by_connect(federation_handle, &federates)
        {
            self.send(
                connect,
                RtiMsg::AnnounceSynchronizationPoint {
                    federation: federation_handle,
                    label: label.clone(),
                    tag: tag.clone(),
                    add_joining_federates,
                    federates: connect_federates,
                },
            );
        }
    }

    fn handle_sync_achieved(
        &mut self,
        _from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        label: String,
        successful: bool,
    ) {
        if let Some(parent) = self.parent {
            self.send(
                parent,
                RtiMsg::SynchronizationPointAchieved {
                    federation: federation_handle,
                    federate,
                    label,
                    successful,
                },
            );
            return;
        }
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let Some(sync) = federation.sync_points.get_mut(&label) else {
            return;
        };
        if sync.achieved(federate, successful) {
            self.broadcast_federation_synchronized(federation_handle, &label);
        }
    }

    fn broadcast_federation_synchronized(
        &mut self,
        federation_handle: FederationHandle,
        label: &str,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let Some(sync) = federation.sync_points.remove(label) else {
            return;
        };
        let success_map = sync.success_map();
        let participants: Vec<_> = success_map.iter().map(|(federate, _)| *federate).collect();
        for (connect, _) in self.group_federates_by_connect(federation_handle, &participants) {
            self.send(
                connect,
                RtiMsg::FederationSynchronized {
                    federation: federation_handle,
                    label: label.to_string(),
                    federates: success_map.clone(),
                },
            );
        }
    }

    fn handle_federation_synchronized(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        label: String,
        federates: Vec<(FederateHandle, bool)>,
    ) {
        if Some(from) != self.parent {
            return;
        }
        let participants: Vec<_> = federates.iter().map(|(federate, _)| *federate).collect();
        for (connect, _) in self.group_federates_by_connect(federation_handle, &participants) {
            self.send(
                connect,
                RtiMsg::FederationSynchronized {
                    federation: federation_handle,
                    label: label.clone(),
                    federates: federates.clone(),
                },
            );
        }
    }

    /// Group federates by the local connect they are reached through,
    /// dropping unknown ones.
    fn group_federates_by_connect(
        &self,
        federation_handle: FederationHandle,
        federates: &[FederateHandle],
    ) -> Vec<(ConnectHandle, Vec<FederateHandle>)> {
        let Some(federation) = self.federations.get(&federation_handle) else {
            return Vec::new();
        };
        let mut grouped: BTreeMap<ConnectHandle, Vec<FederateHandle>> = BTreeMap::new();
        for federate in federates {
            if let Some(connect) = federation.federate_connect(*federate) {
                grouped.entry(connect).or_default().push(*federate);
            }
        }
        grouped.into_iter().collect()
    }

    // -- names and instance handles ----------------------------------------

    fn handle_reserve_name(
        &mut self,
        _from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        names: Vec<String>,
        multiple: bool,
    ) {
        if let Some(parent) = self.parent {
            let msg = if multiple {
                RtiMsg::ReserveMultipleObjectInstanceNameRequest {
                    federation: federation_handle,
                    federate,
                    names,
                }
            } else {
                RtiMsg::ReserveObjectInstanceNameRequest {
                    federation: federation_handle,
                    federate,
                    name: names.into_iter().next().unwrap_or_default(),
                }
            };
            self.send(parent, msg);
            return;
        }

        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        // All-or-nothing: a single clash fails the whole set.
        let success = names
            .iter()
            .all(|name| !federation.is_object_name_in_use(name));
        if success {
            for name in &names {
                federation.reserve_object_name(federate, name);
            }
        }

        let msg = if multiple {
            RtiMsg::ReserveMultipleObjectInstanceNameResponse {
                federation: federation_handle,
                federate,
                names,
                success,
            }
        } else {
            RtiMsg::ReserveObjectInstanceNameResponse {
                federation: federation_handle,
                federate,
                name: names.into_iter().next().unwrap_or_default(),
                success,
            }
        };
        self.route_to_federate(federation_handle, federate, msg);
    }

    fn handle_instance_handles_request(
        &mut self,
        _from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        count: u32,
    ) {
        if let Some(parent) = self.parent {
            self.send(
                parent,
                RtiMsg::ObjectInstanceHandlesRequest {
                    federation: federation_handle,
                    federate,
                    count,
                },
            );
            return;
        }
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Ok(handle) = federation.instance_allocator.get() else {
                break;
            };
            let name = format!("HLAobjectInstance{}", handle.raw());
            federation.reserve_object_name(federate, &name);
            pairs.push((handle, name));
        }
        self.route_to_federate(
            federation_handle,
            federate,
            RtiMsg::ObjectInstanceHandlesResponse {
                federation: federation_handle,
                federate,
                pairs,
            },
        );
    }

    // -- object instances --------------------------------------------------

    fn handle_insert_object_instance(&mut self, from: ConnectHandle, insert: InsertObjectInstance) {
        let Some(federation) = self.federations.get_mut(&insert.federation) else {
            return;
        };
        {
            let instance = federation.insert_object_instance(insert.instance, &insert.name);
            instance.reference(from);
        }
        federation.bind_instance_class(insert.instance, insert.object_class);

        let Some(instance) = federation.instances.get_mut(&insert.instance) else {
            return;
        };
        for attribute in &insert.owned_attributes {
            if let Some(object_attribute) = instance.attribute_mut(*attribute) {
                object_attribute.set_owner(Some(from));
            }
        }

        // Everyone whose attribute-0 cumulative subscription covers the
        // instance has to discover it.
        let targets: Vec<ConnectHandle> = instance
            .privilege_to_delete()
            .map(|attribute| {
                attribute
                    .receiving
                    .iter()
                    .copied()
                    .filter(|connect| *connect != from)
                    .collect()
            })
            .unwrap_or_default();
        for target in &targets {
            instance.reference(*target);
        }
        self.send_all(&targets, RtiMsg::InsertObjectInstance(insert));
    }

    fn handle_delete_instance(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        instance_handle: ObjectInstanceHandle,
        msg: RtiMsg,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let Some(instance) = federation.instances.get(&instance_handle) else {
            return;
        };
        let targets: Vec<ConnectHandle> = instance
            .privilege_to_delete()
            .map(|attribute| {
                attribute
                    .receiving
                    .iter()
                    .copied()
                    .filter(|connect| *connect != from)
                    .collect()
            })
            .unwrap_or_default();
        federation.erase_object_instance(instance_handle);
        self.send_all(&targets, msg);
    }

    fn handle_attribute_update(&mut self, from: ConnectHandle, update: AttributeUpdate) {
        let partition = self.partition_update(from, update.federation, update.instance, &update.attribute_values);
        for (connect, attribute_values) in partition {
            self.send(
                connect,
                RtiMsg::AttributeUpdate(AttributeUpdate {
                    attribute_values,
                    ..update.clone()
                }),
            );
        }
    }

    fn handle_timestamped_attribute_update(
        &mut self,
        from: ConnectHandle,
        update: TimeStampedAttributeUpdate,
    ) {
        let partition = self.partition_update(from, update.federation, update.instance, &update.attribute_values);
        for (connect, attribute_values) in partition {
            self.send(
                connect,
                RtiMsg::TimeStampedAttributeUpdate(TimeStampedAttributeUpdate {
                    attribute_values,
                    ..update.clone()
                }),
            );
        }
    }

    /// Split an update so each receiving connect sees exactly the attribute
    /// subset it subscribes to.
    fn partition_update(
        &self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        instance_handle: ObjectInstanceHandle,
        values: &[accord_model::AttributeValue],
    ) -> Vec<(ConnectHandle, Vec<accord_model::AttributeValue>)> {
        let Some(federation) = self.federations.get(&federation_handle) else {
            return Vec::new();
        };
        let Some(instance) = federation.instances.get(&instance_handle) else {
            return Vec::new();
        };
        let mut per_connect: BTreeMap<ConnectHandle, Vec<accord_model::AttributeValue>> =
            BTreeMap::new();
        for value in values {
            let Some(attribute) = instance.attribute(value.attribute) else {
                continue;
            };
            for connect in &attribute.receiving {
                if *connect == from {
                    continue;
                }
                per_connect
                    .entry(*connect)
                    .or_default()
                    .push(value.clone());
            }
        }
        per_connect.into_iter().collect()
    }

    fn interaction_targets(
        &self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        class: InteractionClassHandle,
    ) -> Vec<ConnectHandle> {
        let Some(federation) = self.federations.get(&federation_handle) else {
            return Vec::new();
        };
        let Some(class) = federation.interaction_classes.get(class) else {
            return Vec::new();
        };
        // TODO narrow this with Region::intersects once subscriptions carry
        // region sets; until then the subscribed set is used unconditionally.
        class
            .pubsub
            .cumulative_subscribed()
            .iter()
            .copied()
            .filter(|connect| *connect != from)
            .collect()
    }

    fn attribute_owner_targets(
        &self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        instance_handle: ObjectInstanceHandle,
        attributes: &[AttributeHandle],
    ) -> Vec<ConnectHandle> {
        let Some(federation) = self.federations.get(&federation_handle) else {
            return Vec::new();
        };
        let Some(instance) = federation.instances.get(&instance_handle) else {
            return Vec::new();
        };
        let mut targets = BTreeSet::new();
        for attribute in attributes {
            if let Some(object_attribute) = instance.attribute(*attribute) {
                if let Some(owner) = object_attribute.owner {
                    if owner != from {
                        targets.insert(owner);
                    }
                }
            }
        }
        targets.into_iter().collect()
    }

    fn instance_receiver_targets(
        &self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        instance_handle: ObjectInstanceHandle,
        attributes: &[AttributeHandle],
    ) -> Vec<ConnectHandle> {
        let Some(federation) = self.federations.get(&federation_handle) else {
            return Vec::new();
        };
        let Some(instance) = federation.instances.get(&instance_handle) else {
            return Vec::new();
        };
        let mut targets = BTreeSet::new();
        for attribute in attributes {
            if let Some(object_attribute) = instance.attribute(*attribute) {
                targets.extend(
                    object_attribute
                        .receiving
                        .iter()
                        .copied()
                        .filter(|connect| *connect != from),
                );
            }
        }
        targets.into_iter().collect()
    }

    // -- publish / subscribe -----------------------------------------------

    fn handle_object_publication(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        class_handle: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        publication: PublicationType,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let other_connects = federation.connects_except(from);
        let Some(class) = federation.object_classes.get_mut(class_handle) else {
            return;
        };

        let mut broadcast_attributes = Vec::new();
        let mut send_attributes: BTreeMap<ConnectHandle, Vec<AttributeHandle>> = BTreeMap::new();
        for attribute in &attributes {
            let Some(class_attribute) = class.attribute_mut(*attribute) else {
                continue;
            };
            match class_attribute.pubsub.set_publication(from, publication) {
                Propagation::Broadcast => broadcast_attributes.push(*attribute),
                Propagation::Send(target) => {
                    send_attributes.entry(target).or_default().push(*attribute)
                }
                Propagation::None => {}
            }
        }

        // Advisory: a freshly publishing connect learns whether anyone is
        // interested in discovering instances of this class.
        let advise_registration = publication == PublicationType::Published
            && self.connect_kind(from) == Some(ConnectKind::Ambassador)
            && self
                .federations
                .get(&federation_handle)
                .and_then(|federation| federation.object_classes.get(class_handle))
                .and_then(|class| class.attribute(AttributeHandle::PRIVILEGE_TO_DELETE))
                .map(|attribute| {
                    attribute
                        .pubsub
                        .subscription_to_connect(from)
                        .is_subscribed()
                })
                .unwrap_or(false);

        if !broadcast_attributes.is_empty() {
            self.send_all(
                &other_connects,
                RtiMsg::ChangeObjectClassPublication {
                    federation: federation_handle,
                    object_class: class_handle,
                    attributes: broadcast_attributes,
                    publication,
                },
            );
        }
        for (target, target_attributes) in send_attributes {
            self.send(
                target,
                RtiMsg::ChangeObjectClassPublication {
                    federation: federation_handle,
                    object_class: class_handle,
                    attributes: target_attributes,
                    publication,
                },
            );
        }
        if advise_registration {
            self.send(
                from,
                RtiMsg::RegistrationForObjectClass {
                    federation: federation_handle,
                    object_class: class_handle,
                    start: true,
                },
            );
        }
    }

    fn handle_object_subscription(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        class_handle: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
        subscription: SubscriptionType,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let other_connects = federation.connects_except(from);

        let mut broadcast_attributes = Vec::new();
        let mut send_attributes: BTreeMap<ConnectHandle, Vec<AttributeHandle>> = BTreeMap::new();
        let mut privilege_transition = None;
        let mut effects = SubscriptionEffects::default();

        for attribute in &attributes {
            let Some(class) = federation.object_classes.get_mut(class_handle) else {
                continue;
            };
            let Some(class_attribute) = class.attribute_mut(*attribute) else {
                continue;
            };
            let propagation = class_attribute.pubsub.set_subscription(from, subscription);
            match propagation {
                Propagation::Broadcast => {
                    broadcast_attributes.push(*attribute);
                    if *attribute == AttributeHandle::PRIVILEGE_TO_DELETE {
                        privilege_transition = Some(subscription.is_subscribed());
                    }
                }
                Propagation::Send(target) => {
                    send_attributes.entry(target).or_default().push(*attribute)
                }
                Propagation::None => {}
            }

            update_cumulative_subscription(
                &mut federation.object_classes,
                &mut federation.instances,
                class_handle,
                *attribute,
                from,
                &mut effects,
            );
        }

        // Newly discovered instances hold a reference for the subscriber.
        let mut discoveries = Vec::new();
        for instance_handle in &effects.discovered {
            if let Some(instance) = federation.instances.get_mut(instance_handle) {
                instance.reference(from);
                discoveries.push(accord_model::InsertObjectInstance {
                    federation: federation_handle,
                    instance: *instance_handle,
                    object_class: instance.object_class.unwrap_or_default(),
                    name: instance.name.clone(),
                    owned_attributes: Vec::new(),
                });
            }
        }

        let publishers: Vec<ConnectHandle> = federation
            .object_classes
            .get(class_handle)
            .and_then(|class| class.attribute(AttributeHandle::PRIVILEGE_TO_DELETE))
            .map(|attribute| {
                attribute
                    .pubsub
                    .published_connects()
                    .iter()
                    .copied()
                    .filter(|connect| *connect != from)
                    .collect()
            })
            .unwrap_or_default();

        if !broadcast_attributes.is_empty() {
            self.send_all(
                &other_connects,
                RtiMsg::ChangeObjectClassSubscription {
                    federation: federation_handle,
                    object_class: class_handle,
                    attributes: broadcast_attributes,
                    subscription,
                },
            );
        }
        for (target, target_attributes) in send_attributes {
            self.send(
                target,
                RtiMsg::ChangeObjectClassSubscription {
                    federation: federation_handle,
                    object_class: class_handle,
                    attributes: target_attributes,
                    subscription,
                },
            );
        }

        for discovery in discoveries {
            self.send(from, RtiMsg::InsertObjectInstance(discovery));
        }
        self.send_subscription_effects(from, federation_handle, &effects);

        if let Some(start) = privilege_transition {
            self.send_all(
                &publishers,
                RtiMsg::RegistrationForObjectClass {
                    federation: federation_handle,
                    object_class: class_handle,
                    start,
                },
            );
        }
    }

    /// Scope and update advisories derived from a cumulative-subscription
    /// recursion. Ambassador connects get them directly; node connects
    /// re-derive them for their own subtree.
    fn send_subscription_effects(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        effects: &SubscriptionEffects,
    ) {
        if self.connect_kind(from) == Some(ConnectKind::Ambassador) {
            let mut in_scope: BTreeMap<ObjectInstanceHandle, Vec<AttributeHandle>> = BTreeMap::new();
            for (instance, attribute) in &effects.in_scope {
                in_scope.entry(*instance).or_default().push(*attribute);
            }
            for (instance, attributes) in in_scope {
                self.send(
                    from,
                    RtiMsg::AttributesInScope {
                        federation: federation_handle,
                        instance,
                        attributes,
                    },
                );
            }
            let mut out_of_scope: BTreeMap<ObjectInstanceHandle, Vec<AttributeHandle>> =
                BTreeMap::new();
            for (instance, attribute) in &effects.out_of_scope {
                out_of_scope.entry(*instance).or_default().push(*attribute);
            }
            for (instance, attributes) in out_of_scope {
                self.send(
                    from,
                    RtiMsg::AttributesOutOfScope {
                        federation: federation_handle,
                        instance,
                        attributes,
                    },
                );
            }
        }

        let mut updates_on: BTreeMap<(ConnectHandle, ObjectInstanceHandle), Vec<AttributeHandle>> =
            BTreeMap::new();
        for (owner, instance, attribute) in &effects.updates_on {
            updates_on
                .entry((*owner, *instance))
                .or_default()
                .push(*attribute);
        }
        for ((owner, instance), attributes) in updates_on {
            self.send(
                owner,
                RtiMsg::TurnUpdatesOnForInstance {
                    federation: federation_handle,
                    instance,
                    attributes,
                    on: true,
                },
            );
        }
        let mut updates_off: BTreeMap<(ConnectHandle, ObjectInstanceHandle), Vec<AttributeHandle>> =
            BTreeMap::new();
        for (owner, instance, attribute) in &effects.updates_off {
            updates_off
                .entry((*owner, *instance))
                .or_default()
                .push(*attribute);
        }
        for ((owner, instance), attributes) in updates_off {
            self.send(
                owner,
                RtiMsg::TurnUpdatesOnForInstance {
                    federation: federation_handle,
                    instance,
                    attributes,
                    on: false,
                },
            );
        }
    }

    fn handle_interaction_publication(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        class_handle: InteractionClassHandle,
        publication: PublicationType,
    ) {
        let from_is_ambassador = self.connect_kind(from) == Some(ConnectKind::Ambassador);
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let other_connects = federation.connects_except(from);
        let Some(class) = federation.interaction_classes.get_mut(class_handle) else {
            return;
        };

        let propagation = class.pubsub.set_publication(from, publication);
        let advise = publication == PublicationType::Published
            && class.pubsub.subscription_to_connect(from).is_subscribed()
            && from_is_ambassador;

        match propagation {
            Propagation::Broadcast => self.send_all(
                &other_connects,
                RtiMsg::ChangeInteractionClassPublication {
                    federation: federation_handle,
                    interaction_class: class_handle,
                    publication,
                },
            ),
            Propagation::Send(target) => self.send(
                target,
                RtiMsg::ChangeInteractionClassPublication {
                    federation: federation_handle,
                    interaction_class: class_handle,
                    publication,
                },
            ),
            Propagation::None => {}
        }
        if advise {
            self.send(
                from,
                RtiMsg::TurnInteractionsOn {
                    federation: federation_handle,
                    interaction_class: class_handle,
                    on: true,
                },
            );
        }
    }

    fn handle_interaction_subscription(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        class_handle: InteractionClassHandle,
        subscription: SubscriptionType,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        let other_connects = federation.connects_except(from);
        let Some(class) = federation.interaction_classes.get_mut(class_handle) else {
            return;
        };

        let propagation = class.pubsub.set_subscription(from, subscription);
        federation
            .interaction_classes
            .update_cumulative_subscription(class_handle, from);

        let publishers: Vec<ConnectHandle> = federation
            .interaction_classes
            .get(class_handle)
            .map(|class| {
                class
                    .pubsub
                    .published_connects()
                    .iter()
                    .copied()
                    .filter(|connect| *connect != from)
                    .collect()
            })
            .unwrap_or_default();

        match propagation {
            Propagation::Broadcast => {
                self.send_all(
                    &other_connects,
                    RtiMsg::ChangeInteractionClassSubscription {
                        federation: federation_handle,
                        interaction_class: class_handle,
                        subscription,
                    },
                );
                self.send_all(
                    &publishers,
                    RtiMsg::TurnInteractionsOn {
                        federation: federation_handle,
                        interaction_class: class_handle,
                        on: subscription.is_subscribed(),
                    },
                );
            }
            Propagation::Send(target) => self.send(
                target,
                RtiMsg::ChangeInteractionClassSubscription {
                    federation: federation_handle,
                    interaction_class: class_handle,
                    subscription,
                },
            ),
            Propagation::None => {}
        }
    }

    // -- time management ---------------------------------------------------

    fn handle_enable_time_regulation(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
        commit_id: u32,
    ) {
        let permitted = self
            .connects
            .get(&from)
            .map(|connect| connect.permit_time_regulation)
            .unwrap_or(false);
        if !permitted && self.connect_kind(from) == Some(ConnectKind::Ambassador) {
            tracing::warn!(?federate, "Time regulation is not permitted for this connect.");
            // A response from the federate itself signals the denial.
            self.send(
                from,
                RtiMsg::EnableTimeRegulationResponse {
                    federation: federation_handle,
                    federate,
                    responding_federate: federate,
                    timestamp: Payload::new(),
                    timestamp_valid: false,
                },
            );
            return;
        }

        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        federation.insert_time_regulating(federate, from, CommitRecord::new(timestamp.clone(), commit_id));
        let targets = federation.connects_except(from);
        self.send_all(
            &targets,
            RtiMsg::EnableTimeRegulationRequest {
                federation: federation_handle,
                federate,
                timestamp,
                commit_id,
            },
        );
    }

    fn handle_commit_lbts(
        &mut self,
        from: ConnectHandle,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        timestamp: Payload,
        commit_type: LowerBoundCommitType,
        commit_id: u32,
    ) {
        let Some(federation) = self.federations.get_mut(&federation_handle) else {
            return;
        };
        if let Some(record) = federation.regulating.get_mut(&federate) {
            record.apply(commit_type, timestamp.clone(), commit_id);
        }
        let targets = federation.connects_except(from);
        self.send_all(
            &targets,
            RtiMsg::CommitLowerBoundTimeStamp {
                federation: federation_handle,
                federate,
                timestamp,
                commit_type,
                commit_id,
            },
        );
        // The root acknowledges: once the ack returns, the commit has been
        // routed everywhere ahead of it.
        if self.is_root() {
            self.route_to_federate(
                federation_handle,
                federate,
                RtiMsg::CommitLowerBoundTimeStampResponse {
                    federation: federation_handle,
                    federate,
                    commit_id,
                },
            );
        }
    }

    fn route_to_federate(
        &self,
        federation_handle: FederationHandle,
        federate: FederateHandle,
        msg: RtiMsg,
    ) {
        let Some(federation) = self.federations.get(&federation_handle) else {
            return;
        };
        let Some(connect) = federation.federate_connect(federate) else {
            return;
        };
        self.send(connect, msg);
    }

    // -- connect teardown --------------------------------------------------

    /// A connect's transport is gone: resign every federate reached through
    /// it with its configured resign action, clean out its pub/sub state and
    /// cascade the loss.
    pub fn erase_connect(&mut self, connect: ConnectHandle) {
        if let Some(data) = self.connects.get_mut(&connect) {
            data.set_inactive();
        }
        self.pending.retain(|(_, pending)| *pending != connect);

        if Some(connect) == self.parent {
            // Orphaned: nothing below us can reach the root anymore.
            tracing::error!("Lost the parent connect; dropping all federations.");
            let targets: Vec<_> = self
                .connects
                .keys()
                .copied()
                .filter(|handle| *handle != connect)
                .collect();
            self.send_all(
                &targets,
                RtiMsg::ConnectionLost {
                    fault: "parent connection lost".into(),
                },
            );
            self.parent = None;
            self.federations.clear();
            self.federation_names.clear();
            self.connects.remove(&connect);
            self.connect_allocator.put(connect);
            return;
        }

        let federation_handles: Vec<_> = self.federations.keys().copied().collect();
        for federation_handle in federation_handles {
            // Resign the connect's federates exactly as if each had sent a
            // leaf resign with its recorded action.
            let federates: Vec<(FederateHandle, ResignAction)> = self
                .federations
                .get(&federation_handle)
                .map(|federation| {
                    federation
                        .federates
                        .values()
                        .filter(|federate| federate.connect == Some(connect))
                        .map(|federate| (federate.handle, federate.resign_action))
                        .collect()
                })
                .unwrap_or_default();
            for (federate, resign_action) in federates {
                self.execute_resign_action(connect, federation_handle, federate, resign_action);
                self.erase_federate_everywhere(federation_handle, federate);
                if let Some(federation) = self.federations.get(&federation_handle) {
                    let parent = self.parent;
                    let targets: Vec<_> = federation
                        .connects_except(connect)
                        .into_iter()
                        .filter(|handle| Some(*handle) != parent)
                        .collect();
                    self.send_all(
                        &targets,
                        RtiMsg::ResignFederateNotify {
                            federation: federation_handle,
                            federate,
                        },
                    );
                }
                if let Some(parent) = self.parent {
                    self.send(
                        parent,
                        RtiMsg::ResignFederationExecutionLeafRequest {
                            federation: federation_handle,
                            federate,
                            resign_action,
                        },
                    );
                }
            }

            // Retract the connect's publications and subscriptions through
            // the regular propagation machinery before the raw cleanup.
            let object_entries: Vec<(ObjectClassHandle, Vec<AttributeHandle>, Vec<AttributeHandle>)> =
                self.federations
                    .get(&federation_handle)
                    .map(|federation| {
                        federation
                            .object_classes
                            .iter()
                            .map(|class| {
                                let published = class
                                    .attributes
                                    .iter()
                                    .filter(|attribute| {
                                        attribute.pubsub.publication(connect)
                                            == PublicationType::Published
                                    })
                                    .map(|attribute| attribute.handle)
                                    .collect();
                                let subscribed = class
                                    .attributes
                                    .iter()
                                    .filter(|attribute| {
                                        attribute.pubsub.subscription(connect).is_subscribed()
                                    })
                                    .map(|attribute| attribute.handle)
                                    .collect();
                                (class.handle, published, subscribed)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
            for (class, published, subscribed) in object_entries {
                if !published.is_empty() {
                    self.handle_object_publication(
                        connect,
                        federation_handle,
                        class,
                        published,
                        PublicationType::Unpublished,
                    );
                }
                if !subscribed.is_empty() {
                    self.handle_object_subscription(
                        connect,
                        federation_handle,
                        class,
                        subscribed,
                        SubscriptionType::Unsubscribed,
                    );
                }
            }
            let interaction_entries: Vec<(InteractionClassHandle, bool, bool)> = self
                .federations
                .get(&federation_handle)
                .map(|federation| {
                    federation
                        .interaction_classes
                        .iter()
                        .map(|class| {
                            (
                                class.handle,
                                class.pubsub.publication(connect) == PublicationType::Published,
                                class.pubsub.subscription(connect).is_subscribed(),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            for (class, published, subscribed) in interaction_entries {
                if published {
                    self.handle_interaction_publication(
                        connect,
                        federation_handle,
                        class,
                        PublicationType::Unpublished,
                    );
                }
                if subscribed {
                    self.handle_interaction_subscription(
                        connect,
                        federation_handle,
                        class,
                        SubscriptionType::Unsubscribed,
                    );
                }
            }

            if let Some(federation) = self.federations.get_mut(&federation_handle) {
                federation.remove_connect(connect);
            }
        }

        self.connects.remove(&connect);
        self.connect_allocator.put(connect);
    }
}
