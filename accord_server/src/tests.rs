//! Node-level tests driving [`ServerNode`] directly over channels.

use tokio::sync::mpsc;

use accord_core::{
    AttributeHandle, ConnectHandle, FederateHandle, FederationHandle, ObjectClassHandle,
    ObjectInstanceHandle, Payload, TIME_FACTORY_FLOAT64,
};
use accord_model::{
    AttributeValue, ConnectKind, CreateFederationExecutionRequest, CreateFederationExecutionStatus,
    FomStringAttribute, FomStringModule, FomStringObjectClass, InsertObjectInstance,
    JoinFederationExecutionRequest, JoinFederationExecutionResponse, JoinFederationExecutionStatus,
    PublicationType, ResignAction, RtiMsg, SubscriptionType, TransportationType,
};

use crate::node::{ServerNode, ServerOptions};

struct TestConnect {
    handle: ConnectHandle,
    rx: mpsc::UnboundedReceiver<RtiMsg>,
}

impl TestConnect {
    fn drain(&mut self) -> Vec<RtiMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }
}

fn ambassador(node: &mut ServerNode, name: &str) -> TestConnect {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = node
        .insert_connect(name.to_string(), ConnectKind::Ambassador, tx)
        .unwrap();
    TestConnect { handle, rx }
}

fn foo_module() -> FomStringModule {
    FomStringModule {
        name: "foo-module".into(),
        object_classes: vec![
            FomStringObjectClass {
                name: vec!["HLAobjectRoot".into(), "Foo".into()],
                attributes: vec![FomStringAttribute {
                    name: "x".into(),
                    order_type: Some("timestamp".into()),
                    transportation_type: None,
                    dimensions: Default::default(),
                }],
            },
            FomStringObjectClass {
                name: vec!["HLAobjectRoot".into(), "Foo".into(), "Bar".into()],
                attributes: Vec::new(),
            },
        ],
        ..FomStringModule::default()
    }
}

fn create_request(name: &str) -> RtiMsg {
    RtiMsg::CreateFederationExecutionRequest(CreateFederationExecutionRequest {
        federation_name: name.into(),
        logical_time_factory_name: TIME_FACTORY_FLOAT64.into(),
        fom_modules: vec![foo_module()],
    })
}

fn join_request(federation: &str, federate: &str) -> RtiMsg {
    RtiMsg::JoinFederationExecutionRequest(JoinFederationExecutionRequest {
        federation_name: federation.into(),
        federate_name: Some(federate.into()),
        federate_type: "test".into(),
        logical_time_factory_name: TIME_FACTORY_FLOAT64.into(),
        additional_fom_modules: Vec::new(),
    })
}

fn join_response(msgs: &[RtiMsg]) -> &JoinFederationExecutionResponse {
    msgs.iter()
        .find_map(|msg| match msg {
            RtiMsg::JoinFederationExecutionResponse(response) => Some(response),
            _ => None,
        })
        .expect("join response")
}

/// Create "fed", join the given ambassadors and return the shared handles.
fn federation_with(
    node: &mut ServerNode,
    connects: &mut [&mut TestConnect],
) -> (FederationHandle, Vec<FederateHandle>) {
    node.dispatch(connects[0].handle, create_request("fed"));
    let created = connects[0].drain();
    assert!(matches!(
        created[..],
        [RtiMsg::CreateFederationExecutionResponse(ref response)]
            if response.status == CreateFederationExecutionStatus::Success
    ));

    let mut federation = FederationHandle::default();
    let mut federates = Vec::new();
    for (index, connect) in connects.iter_mut().enumerate() {
        node.dispatch(connect.handle, join_request("fed", &format!("fed{index}")));
        let msgs = connect.drain();
        let response = join_response(&msgs);
        assert_eq!(response.status, JoinFederationExecutionStatus::Success);
        federation = response.federation;
        federates.push(response.federate);
    }
    (federation, federates)
}

fn class_and_attribute(
    node: &ServerNode,
    federation: FederationHandle,
    class: &str,
    attribute: &str,
) -> (ObjectClassHandle, AttributeHandle) {
    let federation = node.federation(federation).unwrap();
    let class = federation
        .object_classes
        .iter()
        .find(|candidate| candidate.name == class)
        .unwrap();
    let attribute = class.attribute_by_name(attribute).unwrap();
    (class.handle, attribute.handle)
}

/// Ask the root for one pooled instance handle.
fn pooled_pair(
    node: &mut ServerNode,
    connect: &mut TestConnect,
    federation: FederationHandle,
    federate: FederateHandle,
) -> (ObjectInstanceHandle, String) {
    node.dispatch(
        connect.handle,
        RtiMsg::ObjectInstanceHandlesRequest {
            federation,
            federate,
            count: 1,
        },
    );
    connect
        .drain()
        .into_iter()
        .find_map(|msg| match msg {
            RtiMsg::ObjectInstanceHandlesResponse { mut pairs, .. } => pairs.pop(),
            _ => None,
        })
        .expect("instance handle pair")
}

#[test]
fn create_rejects_duplicates_and_unknown_time_factories() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");

    node.dispatch(a.handle, create_request("fed"));
    assert!(matches!(
        a.drain()[..],
        [RtiMsg::CreateFederationExecutionResponse(ref response)]
            if response.status == CreateFederationExecutionStatus::Success
    ));

    node.dispatch(a.handle, create_request("fed"));
    assert!(matches!(
        a.drain()[..],
        [RtiMsg::CreateFederationExecutionResponse(ref response)]
            if response.status == CreateFederationExecutionStatus::AlreadyExists
    ));

    node.dispatch(
        a.handle,
        RtiMsg::CreateFederationExecutionRequest(CreateFederationExecutionRequest {
            federation_name: "other".into(),
            logical_time_factory_name: "HLAinteger64Time".into(),
            fom_modules: Vec::new(),
        }),
    );
    assert!(matches!(
        a.drain()[..],
        [RtiMsg::CreateFederationExecutionResponse(ref response)]
            if response.status == CreateFederationExecutionStatus::CouldNotCreateLogicalTimeFactory
    ));
}

#[test]
fn inconsistent_fdd_join_leaves_federation_unchanged() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, _) = federation_with(&mut node, &mut [&mut a]);

    let module_count = node.federation(federation).unwrap().module_set.module_list().len();

    // Redeclare Foo with a mismatched attribute list.
    let mut bad = foo_module();
    bad.name = "bad".into();
    bad.object_classes[0].attributes[0].name = "mismatch".into();
    node.dispatch(
        b.handle,
        RtiMsg::JoinFederationExecutionRequest(JoinFederationExecutionRequest {
            federation_name: "fed".into(),
            federate_name: Some("B".into()),
            federate_type: "test".into(),
            logical_time_factory_name: TIME_FACTORY_FLOAT64.into(),
            additional_fom_modules: vec![bad],
        }),
    );
    let msgs = b.drain();
    assert!(matches!(
        join_response(&msgs).status,
        JoinFederationExecutionStatus::InconsistentFdd(_)
    ));

    let federation_data = node.federation(federation).unwrap();
    assert_eq!(federation_data.module_set.module_list().len(), module_count);
    assert_eq!(federation_data.federates.len(), 1);
}

#[test]
fn duplicate_federate_name_is_rejected() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    federation_with(&mut node, &mut [&mut a]);

    node.dispatch(b.handle, join_request("fed", "fed0"));
    let msgs = b.drain();
    assert_eq!(
        join_response(&msgs).status,
        JoinFederationExecutionStatus::FederateNameAlreadyInUse
    );
}

#[test]
fn subscription_propagation_follows_the_decision_table() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let mut c = ambassador(&mut node, "C");
    let (federation, _) = federation_with(&mut node, &mut [&mut a, &mut b, &mut c]);
    let (foo, x) = class_and_attribute(&node, federation, "Foo", "x");
    for connect in [&mut a, &mut b, &mut c] {
        connect.drain();
    }

    // First subscriber: 0 -> 1, broadcast to everyone else.
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    assert!(a
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::ChangeObjectClassSubscription { .. })));
    assert!(c
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::ChangeObjectClassSubscription { .. })));

    // Second subscriber: 1 -> 2, only the previously exclusive one hears it.
    node.dispatch(
        c.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    assert!(b
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::ChangeObjectClassSubscription { .. })));
    assert!(a
        .drain()
        .iter()
        .all(|msg| !matches!(msg, RtiMsg::ChangeObjectClassSubscription { .. })));
}

#[test]
fn register_reflect_and_partition_by_subscription() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b]);
    let (foo, x) = class_and_attribute(&node, federation, "Foo", "x");
    let privilege = AttributeHandle::PRIVILEGE_TO_DELETE;
    for connect in [&mut a, &mut b] {
        connect.drain();
    }

    // A publishes, B subscribes Foo.x (and discovery via attribute 0).
    node.dispatch(
        a.handle,
        RtiMsg::ChangeObjectClassPublication {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            publication: PublicationType::Published,
        },
    );
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    // The publisher hears that registration matters now.
    assert!(a
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::RegistrationForObjectClass { start: true, .. })));
    b.drain();

    // A registers an instance.
    let (instance, name) = pooled_pair(&mut node, &mut a, federation, federates[0]);
    node.dispatch(
        a.handle,
        RtiMsg::InsertObjectInstance(InsertObjectInstance {
            federation,
            instance,
            object_class: foo,
            name: name.clone(),
            owned_attributes: vec![privilege, x],
        }),
    );
    let discovered = b.drain();
    assert!(discovered.iter().any(|msg| matches!(
        msg,
        RtiMsg::InsertObjectInstance(insert)
            if insert.instance == instance && insert.name == name
    )));

    // The update reaches B but not its producer.
    node.dispatch(
        a.handle,
        RtiMsg::AttributeUpdate(accord_model::AttributeUpdate {
            federation,
            federate: federates[0],
            instance,
            attribute_values: vec![AttributeValue {
                attribute: x,
                value: Payload::from_static(b"42"),
            }],
            tag: Payload::new(),
            transportation: TransportationType::Reliable,
        }),
    );
    let updates = b.drain();
    assert!(updates.iter().any(|msg| matches!(
        msg,
        RtiMsg::AttributeUpdate(update)
            if update.instance == instance && update.attribute_values.len() == 1
    )));
    assert!(a.drain().is_empty());

    // The owner never receives its own attributes.
    let federation_data = node.federation(federation).unwrap();
    let instance_data = federation_data.instances.get(&instance).unwrap();
    for attribute in instance_data.attributes() {
        if let Some(owner) = attribute.owner {
            assert!(!attribute.receiving.contains(&owner));
        }
    }
}

#[test]
fn attribute_zero_receivers_survive_unsubscribe() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b]);
    let (foo, x) = class_and_attribute(&node, federation, "Foo", "x");
    let privilege = AttributeHandle::PRIVILEGE_TO_DELETE;

    node.dispatch(
        a.handle,
        RtiMsg::ChangeObjectClassPublication {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            publication: PublicationType::Published,
        },
    );
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    let (instance, name) = pooled_pair(&mut node, &mut a, federation, federates[0]);
    node.dispatch(
        a.handle,
        RtiMsg::InsertObjectInstance(InsertObjectInstance {
            federation,
            instance,
            object_class: foo,
            name,
            owned_attributes: vec![privilege, x],
        }),
    );
    for connect in [&mut a, &mut b] {
        connect.drain();
    }

    // B unsubscribes x: x goes out of scope, but the attribute-0 receiving
    // set keeps B so lifecycle messages still arrive.
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![x],
            subscription: SubscriptionType::Unsubscribed,
        },
    );
    let federation_data = node.federation(federation).unwrap();
    let instance_data = federation_data.instances.get(&instance).unwrap();
    assert!(!instance_data.attribute(x).unwrap().receiving.contains(&b.handle));
    assert!(instance_data
        .attribute(privilege)
        .unwrap()
        .receiving
        .contains(&b.handle));

    // Resubscribing does not re-discover the instance.
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    assert!(b
        .drain()
        .iter()
        .all(|msg| !matches!(msg, RtiMsg::InsertObjectInstance(_))));

    // The delete still reaches B.
    node.dispatch(
        a.handle,
        RtiMsg::DeleteObjectInstance {
            federation,
            federate: federates[0],
            instance,
            tag: Payload::new(),
        },
    );
    assert!(b
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::DeleteObjectInstance { .. })));
}

#[test]
fn name_reservation_collision() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b]);

    node.dispatch(
        a.handle,
        RtiMsg::ReserveObjectInstanceNameRequest {
            federation,
            federate: federates[0],
            name: "alpha".into(),
        },
    );
    assert!(a.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::ReserveObjectInstanceNameResponse { success: true, .. }
    )));

    node.dispatch(
        b.handle,
        RtiMsg::ReserveObjectInstanceNameRequest {
            federation,
            federate: federates[1],
            name: "alpha".into(),
        },
    );
    assert!(b.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::ReserveObjectInstanceNameResponse { success: false, .. }
    )));
}

#[test]
fn synchronization_barrier_completes_when_all_achieve() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let mut c = ambassador(&mut node, "C");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b, &mut c]);
    for connect in [&mut a, &mut b, &mut c] {
        connect.drain();
    }

    node.dispatch(
        a.handle,
        RtiMsg::RegisterFederationSynchronizationPoint {
            federation,
            federate: federates[0],
            label: "L".into(),
            tag: Payload::new(),
            federates: federates.clone(),
        },
    );
    // Registration succeeded and every participant hears the announcement.
    assert!(a.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::RegisterFederationSynchronizationPointResponse { success: true, .. }
    )));
    for (index, connect) in [&mut b, &mut c].into_iter().enumerate() {
        let announced = connect.drain();
        assert!(
            announced
                .iter()
                .any(|msg| matches!(msg, RtiMsg::AnnounceSynchronizationPoint { label, .. } if label == "L")),
            "participant {index} missed the announcement"
        );
    }

    // Nothing fires until the last participant achieves.
    for (federate, connect) in [(federates[0], &mut a), (federates[1], &mut b)] {
        node.dispatch(
            connect.handle,
            RtiMsg::SynchronizationPointAchieved {
                federation,
                federate,
                label: "L".into(),
                successful: true,
            },
        );
    }
    assert!(a
        .drain()
        .iter()
        .all(|msg| !matches!(msg, RtiMsg::FederationSynchronized { .. })));

    node.dispatch(
        c.handle,
        RtiMsg::SynchronizationPointAchieved {
            federation,
            federate: federates[2],
            label: "L".into(),
            successful: true,
        },
    );
    for connect in [&mut a, &mut b, &mut c] {
        assert!(connect.drain().iter().any(|msg| matches!(
            msg,
            RtiMsg::FederationSynchronized { label, federates, .. }
                if label == "L" && federates.iter().all(|(_, ok)| *ok)
        )));
    }
}

#[test]
fn connect_loss_resigns_with_delete() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b]);
    let (foo, x) = class_and_attribute(&node, federation, "Foo", "x");
    let privilege = AttributeHandle::PRIVILEGE_TO_DELETE;

    node.dispatch(
        a.handle,
        RtiMsg::ChangeObjectClassPublication {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            publication: PublicationType::Published,
        },
    );
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    let (instance, name) = pooled_pair(&mut node, &mut a, federation, federates[0]);
    node.dispatch(
        a.handle,
        RtiMsg::InsertObjectInstance(InsertObjectInstance {
            federation,
            instance,
            object_class: foo,
            name: name.clone(),
            owned_attributes: vec![privilege, x],
        }),
    );
    for connect in [&mut a, &mut b] {
        connect.drain();
    }

    // A's transport drops. Its resign action defaults to
    // cancel-then-delete-then-divest, so B sees the instance deleted.
    node.erase_connect(a.handle);
    let msgs = b.drain();
    assert!(msgs.iter().any(|msg| matches!(
        msg,
        RtiMsg::DeleteObjectInstance { instance: deleted, .. } if *deleted == instance
    )));
    assert!(msgs.iter().any(|msg| matches!(
        msg,
        RtiMsg::ResignFederateNotify { federate, .. } if *federate == federates[0]
    )));

    let federation_data = node.federation(federation).unwrap();
    assert!(!federation_data.instances.contains_key(&instance));
    assert_eq!(federation_data.federates.len(), 1);
}

#[test]
fn resign_request_executes_the_resign_action() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b]);
    let (foo, x) = class_and_attribute(&node, federation, "Foo", "x");
    let privilege = AttributeHandle::PRIVILEGE_TO_DELETE;

    node.dispatch(
        a.handle,
        RtiMsg::ChangeObjectClassPublication {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            publication: PublicationType::Published,
        },
    );
    node.dispatch(
        b.handle,
        RtiMsg::ChangeObjectClassSubscription {
            federation,
            object_class: foo,
            attributes: vec![privilege, x],
            subscription: SubscriptionType::SubscribedActive,
        },
    );
    let (instance, name) = pooled_pair(&mut node, &mut a, federation, federates[0]);
    node.dispatch(
        a.handle,
        RtiMsg::InsertObjectInstance(InsertObjectInstance {
            federation,
            instance,
            object_class: foo,
            name,
            owned_attributes: vec![privilege, x],
        }),
    );
    for connect in [&mut a, &mut b] {
        connect.drain();
    }

    node.dispatch(
        a.handle,
        RtiMsg::ResignFederationExecutionLeafRequest {
            federation,
            federate: federates[0],
            resign_action: ResignAction::DeleteObjects,
        },
    );
    let msgs = b.drain();
    assert!(msgs
        .iter()
        .any(|msg| matches!(msg, RtiMsg::DeleteObjectInstance { .. })));
    assert!(msgs
        .iter()
        .any(|msg| matches!(msg, RtiMsg::ResignFederateNotify { .. })));
    assert_eq!(node.federation(federation).unwrap().federates.len(), 1);
}

#[test]
fn destroy_requires_an_empty_federation() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a]);

    node.dispatch(
        a.handle,
        RtiMsg::DestroyFederationExecutionRequest(
            accord_model::DestroyFederationExecutionRequest {
                federation_name: "fed".into(),
            },
        ),
    );
    assert!(a.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::DestroyFederationExecutionResponse(response)
            if response.status
                == accord_model::DestroyFederationExecutionStatus::FederatesCurrentlyJoined
    )));

    node.dispatch(
        a.handle,
        RtiMsg::ResignFederationExecutionLeafRequest {
            federation,
            federate: federates[0],
            resign_action: ResignAction::NoAction,
        },
    );
    node.dispatch(
        a.handle,
        RtiMsg::DestroyFederationExecutionRequest(
            accord_model::DestroyFederationExecutionRequest {
                federation_name: "fed".into(),
            },
        ),
    );
    assert!(a.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::DestroyFederationExecutionResponse(response)
            if response.status == accord_model::DestroyFederationExecutionStatus::Success
    )));
    assert!(node.federation(federation).is_none());
}

#[test]
fn time_regulation_records_and_floods_commits() {
    let mut node = ServerNode::new(ServerOptions::default());
    let mut a = ambassador(&mut node, "A");
    let mut b = ambassador(&mut node, "B");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a, &mut b]);
    for connect in [&mut a, &mut b] {
        connect.drain();
    }

    let lbts = accord_core::LogicalTime::from_seconds(1.0);
    node.dispatch(
        a.handle,
        RtiMsg::EnableTimeRegulationRequest {
            federation,
            federate: federates[0],
            timestamp: lbts.to_payload(),
            commit_id: 1,
        },
    );
    // B hears the enable request; the federation records the regulator.
    assert!(b
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::EnableTimeRegulationRequest { .. })));
    assert!(node
        .federation(federation)
        .unwrap()
        .regulating
        .contains_key(&federates[0]));

    // A commit floods to B and is acknowledged back to A by the root.
    let commit = accord_core::LogicalTime::from_seconds(11.0);
    node.dispatch(
        a.handle,
        RtiMsg::CommitLowerBoundTimeStamp {
            federation,
            federate: federates[0],
            timestamp: commit.to_payload(),
            commit_type: accord_model::LowerBoundCommitType::TimeAdvance,
            commit_id: 2,
        },
    );
    assert!(b
        .drain()
        .iter()
        .any(|msg| matches!(msg, RtiMsg::CommitLowerBoundTimeStamp { .. })));
    assert!(a.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::CommitLowerBoundTimeStampResponse { commit_id: 2, .. }
    )));
}

#[test]
fn time_regulation_denied_when_not_permitted() {
    let mut node = ServerNode::new(ServerOptions {
        permit_time_regulation: false,
        ..ServerOptions::default()
    });
    let mut a = ambassador(&mut node, "A");
    let (federation, federates) = federation_with(&mut node, &mut [&mut a]);
    a.drain();

    node.dispatch(
        a.handle,
        RtiMsg::EnableTimeRegulationRequest {
            federation,
            federate: federates[0],
            timestamp: accord_core::LogicalTime::ZERO.to_payload(),
            commit_id: 1,
        },
    );
    // The denial is a response from the federate itself.
    assert!(a.drain().iter().any(|msg| matches!(
        msg,
        RtiMsg::EnableTimeRegulationResponse {
            responding_federate,
            timestamp_valid: false,
            ..
        } if *responding_federate == federates[0]
    )));
    assert!(!node
        .federation(federation)
        .unwrap()
        .regulating
        .contains_key(&federates[0]));
}
