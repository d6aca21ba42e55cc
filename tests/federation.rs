//! End-to-end federation tests over loopback TCP: one root server node (or a
//! small tree), ambassadors connected to it, real protocol traffic.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use accord::core::{LogicalTime, LogicalTimeInterval, Payload, TIME_FACTORY_FLOAT64};
use accord::federate::{connect, Ambassador, FederateCallback};
use accord::model::{
    AttributeValue, FomStringAttribute, FomStringModule, FomStringObjectClass, ResignAction,
};
use accord::server::{serve, ServerOptions};

const PUMP: Duration = Duration::from_millis(100);
const SETTLE: Duration = Duration::from_millis(300);

async fn start_root() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let handles = serve(ServerOptions::default(), listener, None).await.unwrap();
    handles.local_addr
}

async fn start_child(parent: SocketAddr) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = ServerOptions {
        name: "child".into(),
        ..ServerOptions::default()
    };
    let handles = serve(options, listener, Some(parent)).await.unwrap();
    handles.local_addr
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

/// Pump callbacks until `pred` matches, panicking after ten seconds.
async fn wait_for(
    ambassador: &mut Ambassador,
    what: &str,
    pred: impl Fn(&FederateCallback) -> bool,
) -> FederateCallback {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match ambassador.evoke_callback(PUMP).await.unwrap() {
            Some(callback) if pred(&callback) => return callback,
            Some(other) => tracing::debug!(?other, "Skipping callback."),
            None => {}
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
    }
}

/// Process whatever arrived without expecting a particular callback.
async fn pump(ambassador: &mut Ambassador) {
    let _ = ambassador.evoke_callback(SETTLE).await.unwrap();
}

async fn join(
    addr: SocketAddr,
    federation: &str,
    federate: &str,
    create: bool,
) -> Ambassador {
    let mut ambassador = connect(addr, federate).await.unwrap();
    if create {
        ambassador
            .create_federation_execution(federation, vec![foo_module()], TIME_FACTORY_FLOAT64)
            .await
            .unwrap();
    }
    ambassador
        .join_federation_execution(federation, Some(federate), "test", Vec::new())
        .await
        .unwrap();
    ambassador
}

#[test_log::test(tokio::test)]
async fn create_join_register_reflect() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let foo = a.object_class_handle("Foo").unwrap();
    let x = a.attribute_handle(foo, "x").unwrap();
    a.publish_object_class_attributes(foo, &[x]).unwrap();

    a.reserve_object_instance_name("foo1").await.unwrap();
    wait_for(&mut a, "name reservation", |callback| {
        matches!(
            callback,
            FederateCallback::ObjectInstanceNameReservationSucceeded { name } if name == "foo1"
        )
    })
    .await;
    let instance = a.register_object_instance_with_name(foo, "foo1").await.unwrap();

    // B subscribes after registration and must still discover the instance.
    let foo_at_b = b.object_class_handle("Foo").unwrap();
    let x_at_b = b.attribute_handle(foo_at_b, "x").unwrap();
    b.subscribe_object_class_attributes(foo_at_b, &[x_at_b], true)
        .unwrap();

    let discovered = wait_for(&mut b, "discovery", |callback| {
        matches!(callback, FederateCallback::DiscoverObjectInstance { .. })
    })
    .await;
    match discovered {
        FederateCallback::DiscoverObjectInstance {
            instance: handle,
            object_class,
            name,
        } => {
            assert_eq!(handle, instance);
            assert_eq!(object_class, foo_at_b);
            assert_eq!(name, "foo1");
        }
        _ => unreachable!(),
    }

    a.update_attribute_values(
        instance,
        vec![AttributeValue {
            attribute: x,
            value: Payload::from_static(b"42"),
        }],
        Payload::new(),
    )
    .unwrap();

    let reflected = wait_for(&mut b, "reflection", |callback| {
        matches!(callback, FederateCallback::ReflectAttributeValues { .. })
    })
    .await;
    match reflected {
        FederateCallback::ReflectAttributeValues {
            instance: handle,
            attribute_values,
            ..
        } => {
            assert_eq!(handle, instance);
            assert_eq!(attribute_values.len(), 1);
            assert_eq!(attribute_values[0].attribute, x);
            assert_eq!(&attribute_values[0].value[..], b"42");
        }
        _ => unreachable!(),
    }
}

#[test_log::test(tokio::test)]
async fn inheritance_subscription_discovers_as_known_class() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let bar = a.object_class_handle("Bar").unwrap();
    let x = a.attribute_handle(bar, "x").unwrap();
    a.publish_object_class_attributes(bar, &[x]).unwrap();

    // B subscribes at Foo only.
    let foo = b.object_class_handle("Foo").unwrap();
    let x_at_b = b.attribute_handle(foo, "x").unwrap();
    b.subscribe_object_class_attributes(foo, &[x_at_b], true)
        .unwrap();
    pump(&mut b).await;

    let instance = a.register_object_instance(bar).await.unwrap();
    let discovered = wait_for(&mut b, "discovery", |callback| {
        matches!(callback, FederateCallback::DiscoverObjectInstance { .. })
    })
    .await;
    match discovered {
        FederateCallback::DiscoverObjectInstance {
            instance: handle,
            object_class,
            ..
        } => {
            assert_eq!(handle, instance);
            // Known class is the most-derived subscribed ancestor, Foo.
            assert_eq!(object_class, foo);
        }
        _ => unreachable!(),
    }

    a.update_attribute_values(
        instance,
        vec![AttributeValue {
            attribute: x,
            value: Payload::from_static(b"7"),
        }],
        Payload::new(),
    )
    .unwrap();
    let reflected = wait_for(&mut b, "reflection", |callback| {
        matches!(callback, FederateCallback::ReflectAttributeValues { .. })
    })
    .await;
    match reflected {
        FederateCallback::ReflectAttributeValues { attribute_values, .. } => {
            assert_eq!(attribute_values.len(), 1);
            assert_eq!(attribute_values[0].attribute, x_at_b);
        }
        _ => unreachable!(),
    }
}

#[test_log::test(tokio::test)]
async fn time_coordination_delivers_before_grant() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let foo = a.object_class_handle("Foo").unwrap();
    let x = a.attribute_handle(foo, "x").unwrap();
    a.publish_object_class_attributes(foo, &[x]).unwrap();
    b.subscribe_object_class_attributes(foo, &[x], true).unwrap();
    pump(&mut b).await;
    let instance = a.register_object_instance(foo).await.unwrap();
    wait_for(&mut b, "discovery", |callback| {
        matches!(callback, FederateCallback::DiscoverObjectInstance { .. })
    })
    .await;

    // A regulates with lookahead 1.0 at time 0.0.
    a.enable_time_regulation(LogicalTimeInterval::from_seconds(1.0))
        .unwrap();
    // B answers the enable request while pumping.
    pump(&mut b).await;
    wait_for(&mut a, "time regulation", |callback| {
        matches!(callback, FederateCallback::TimeRegulationEnabled { .. })
    })
    .await;

    b.enable_time_constrained().unwrap();
    wait_for(&mut b, "time constrained", |callback| {
        matches!(callback, FederateCallback::TimeConstrainedEnabled { .. })
    })
    .await;

    // While A's LBTS is 1.0, B gets no grant for an advance to 3.0.
    b.time_advance_request(LogicalTime::from_seconds(3.0)).unwrap();
    assert!(b.evoke_callback(SETTLE).await.unwrap().is_none());

    // A sends a timestamped update at t=5.0 and advances to 10.0.
    a.update_attribute_values_with_time(
        instance,
        vec![AttributeValue {
            attribute: x,
            value: Payload::from_static(b"5"),
        }],
        Payload::new(),
        LogicalTime::from_seconds(5.0),
    )
    .unwrap();
    a.time_advance_request(LogicalTime::from_seconds(10.0)).unwrap();
    let granted = wait_for(&mut a, "A's grant", |callback| {
        matches!(callback, FederateCallback::TimeAdvanceGrant { .. })
    })
    .await;
    assert_eq!(
        granted,
        FederateCallback::TimeAdvanceGrant {
            time: LogicalTime::from_seconds(10.0)
        }
    );

    // A's commit unblocks B's advance; GALT at B is 11.0.
    let granted = wait_for(&mut b, "B's first grant", |callback| {
        matches!(callback, FederateCallback::TimeAdvanceGrant { .. })
    })
    .await;
    assert_eq!(
        granted,
        FederateCallback::TimeAdvanceGrant {
            time: LogicalTime::from_seconds(3.0)
        }
    );
    assert_eq!(b.query_galt().unwrap(), Some(LogicalTime::from_seconds(11.0)));

    // B's next advance delivers the t=5.0 update before the grant.
    b.time_advance_request(LogicalTime::from_seconds(10.0)).unwrap();
    let first = wait_for(&mut b, "the reflection", |callback| {
        matches!(
            callback,
            FederateCallback::ReflectAttributeValues { .. }
                | FederateCallback::TimeAdvanceGrant { .. }
        )
    })
    .await;
    match first {
        FederateCallback::ReflectAttributeValues { timestamp, .. } => {
            assert_eq!(timestamp, Some(LogicalTime::from_seconds(5.0)));
        }
        other => panic!("expected the reflection before the grant, got {other:?}"),
    }
    let granted = wait_for(&mut b, "B's second grant", |callback| {
        matches!(callback, FederateCallback::TimeAdvanceGrant { .. })
    })
    .await;
    assert_eq!(
        granted,
        FederateCallback::TimeAdvanceGrant {
            time: LogicalTime::from_seconds(10.0)
        }
    );
}

#[test_log::test(tokio::test)]
async fn name_collision_fails_the_second_reservation() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    a.reserve_object_instance_name("alpha").await.unwrap();
    wait_for(&mut a, "A's reservation", |callback| {
        matches!(
            callback,
            FederateCallback::ObjectInstanceNameReservationSucceeded { name } if name == "alpha"
        )
    })
    .await;

    b.reserve_object_instance_name("alpha").await.unwrap();
    wait_for(&mut b, "B's failed reservation", |callback| {
        matches!(
            callback,
            FederateCallback::ObjectInstanceNameReservationFailed { name } if name == "alpha"
        )
    })
    .await;
}

#[test_log::test(tokio::test)]
async fn dropped_connection_deletes_owned_objects() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let foo = a.object_class_handle("Foo").unwrap();
    let x = a.attribute_handle(foo, "x").unwrap();
    a.publish_object_class_attributes(foo, &[x]).unwrap();
    b.subscribe_object_class_attributes(foo, &[x], true).unwrap();
    pump(&mut b).await;
    let instance = a.register_object_instance(foo).await.unwrap();
    wait_for(&mut b, "discovery", |callback| {
        matches!(callback, FederateCallback::DiscoverObjectInstance { .. })
    })
    .await;

    // A's connect drops without a resign; the default resign action deletes
    // its owned objects.
    drop(a);

    let removed = wait_for(&mut b, "removal", |callback| {
        matches!(callback, FederateCallback::RemoveObjectInstance { .. })
    })
    .await;
    assert!(matches!(
        removed,
        FederateCallback::RemoveObjectInstance { instance: handle, .. } if handle == instance
    ));
}

#[test_log::test(tokio::test)]
async fn synchronization_barrier() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;
    let mut c = join(addr, "fed", "C", false).await;

    let participants: Vec<_> = [&a, &b, &c]
        .iter()
        .map(|ambassador| ambassador.federate_handle().unwrap())
        .collect();
    a.register_federation_synchronization_point("L", Payload::new(), participants)
        .unwrap();
    wait_for(&mut a, "registration", |callback| {
        matches!(
            callback,
            FederateCallback::SynchronizationPointRegistrationSucceeded { label } if label == "L"
        )
    })
    .await;

    for ambassador in [&mut a, &mut b, &mut c] {
        wait_for(ambassador, "announcement", |callback| {
            matches!(
                callback,
                FederateCallback::AnnounceSynchronizationPoint { label, .. } if label == "L"
            )
        })
        .await;
        ambassador.synchronization_point_achieved("L", true).unwrap();
    }

    for ambassador in [&mut a, &mut b, &mut c] {
        let synchronized = wait_for(ambassador, "synchronization", |callback| {
            matches!(callback, FederateCallback::FederationSynchronized { .. })
        })
        .await;
        assert!(matches!(
            synchronized,
            FederateCallback::FederationSynchronized { label, failed }
                if label == "L" && failed.is_empty()
        ));
    }
}

#[test_log::test(tokio::test)]
async fn barrier_waits_for_the_last_participant() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let participants: Vec<_> = [&a, &b]
        .iter()
        .map(|ambassador| ambassador.federate_handle().unwrap())
        .collect();
    a.register_federation_synchronization_point("L", Payload::new(), participants)
        .unwrap();

    wait_for(&mut a, "announcement", |callback| {
        matches!(callback, FederateCallback::AnnounceSynchronizationPoint { .. })
    })
    .await;
    a.synchronization_point_achieved("L", true).unwrap();

    // Only A achieved; nothing fires yet.
    assert!(a.evoke_callback(SETTLE).await.unwrap().is_none());

    wait_for(&mut b, "announcement", |callback| {
        matches!(callback, FederateCallback::AnnounceSynchronizationPoint { .. })
    })
    .await;
    b.synchronization_point_achieved("L", true).unwrap();

    for ambassador in [&mut a, &mut b] {
        wait_for(ambassador, "synchronization", |callback| {
            matches!(callback, FederateCallback::FederationSynchronized { .. })
        })
        .await;
    }
}

#[test_log::test(tokio::test)]
async fn preconditions_are_checked_locally() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;

    // Registering without a publication fails.
    let foo = a.object_class_handle("Foo").unwrap();
    assert!(matches!(
        a.register_object_instance(foo).await,
        Err(accord::core::RtiError::ObjectClassNotPublished(_))
    ));

    // RTI-reserved name prefix is illegal.
    assert!(matches!(
        a.reserve_object_instance_name("HLAthing").await,
        Err(accord::core::RtiError::IllegalName(_))
    ));

    // Advancing into the past fails.
    a.time_advance_request(LogicalTime::from_seconds(5.0)).unwrap();
    wait_for(&mut a, "grant", |callback| {
        matches!(callback, FederateCallback::TimeAdvanceGrant { .. })
    })
    .await;
    assert!(matches!(
        a.time_advance_request(LogicalTime::from_seconds(1.0)),
        Err(accord::core::RtiError::LogicalTimeAlreadyPassed)
    ));

    // Unknown classes are rejected by name lookup.
    assert!(matches!(
        a.object_class_handle("NoSuchClass"),
        Err(accord::core::RtiError::ObjectClassNotDefined(_))
    ));
}

#[test_log::test(tokio::test)]
async fn publish_unpublish_round_trip() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let foo = a.object_class_handle("Foo").unwrap();
    let x = a.attribute_handle(foo, "x").unwrap();

    a.publish_object_class_attributes(foo, &[x]).unwrap();
    a.unpublish_object_class(foo).unwrap();
    pump(&mut b).await;
    pump(&mut a).await;

    // The publication state round-tripped: registering fails again.
    assert!(matches!(
        a.register_object_instance(foo).await,
        Err(accord::core::RtiError::ObjectClassNotPublished(_))
    ));
}

#[test_log::test(tokio::test)]
async fn interactions_route_by_cumulative_subscription() {
    let addr = start_root().await;
    let mut a = join(addr, "fed", "A", true).await;
    let mut b = join(addr, "fed", "B", false).await;

    let root = a.interaction_class_handle("HLAinteractionRoot").unwrap();
    a.publish_interaction_class(root).unwrap();
    b.subscribe_interaction_class(root, true).unwrap();
    pump(&mut a).await;

    a.send_interaction(root, Vec::new(), Payload::from_static(b"ping"))
        .unwrap();
    let received = wait_for(&mut b, "interaction", |callback| {
        matches!(callback, FederateCallback::ReceiveInteraction { .. })
    })
    .await;
    assert!(matches!(
        received,
        FederateCallback::ReceiveInteraction { interaction_class, tag, .. }
            if interaction_class == root && &tag[..] == b"ping"
    ));
}

#[test_log::test(tokio::test)]
async fn federation_through_a_child_node() {
    let root_addr = start_root().await;
    let child_addr = start_child(root_addr).await;

    // A talks to the root, B to the child node.
    let mut a = join(root_addr, "fed", "A", true).await;
    let mut b = join(child_addr, "fed", "B", false).await;

    let foo = a.object_class_handle("Foo").unwrap();
    let x = a.attribute_handle(foo, "x").unwrap();
    a.publish_object_class_attributes(foo, &[x]).unwrap();

    let foo_at_b = b.object_class_handle("Foo").unwrap();
    let x_at_b = b.attribute_handle(foo_at_b, "x").unwrap();
    b.subscribe_object_class_attributes(foo_at_b, &[x_at_b], true)
        .unwrap();
    pump(&mut b).await;

    let instance = a.register_object_instance(foo).await.unwrap();
    wait_for(&mut b, "discovery across the tree", |callback| {
        matches!(
            callback,
            FederateCallback::DiscoverObjectInstance { instance: handle, .. }
                if *handle == instance
        )
    })
    .await;

    a.update_attribute_values(
        instance,
        vec![AttributeValue {
            attribute: x,
            value: Payload::from_static(b"tree"),
        }],
        Payload::new(),
    )
    .unwrap();
    let reflected = wait_for(&mut b, "reflection across the tree", |callback| {
        matches!(callback, FederateCallback::ReflectAttributeValues { .. })
    })
    .await;
    assert!(matches!(
        reflected,
        FederateCallback::ReflectAttributeValues { attribute_values, .. }
            if &attribute_values[0].value[..] == b"tree"
    ));

    // Resign on both sides, then the federation can be destroyed.
    b.resign_federation_execution(ResignAction::NoAction).unwrap();
    a.resign_federation_execution(ResignAction::NoAction).unwrap();
    // Allow the resigns to reach the root before asking for the destroy.
    tokio::time::sleep(SETTLE).await;
    a.destroy_federation_execution("fed").await.unwrap();
}

#[test_log::test(tokio::test)]
async fn enumerate_lists_created_federations() {
    let addr = start_root().await;
    let mut a = connect(addr, "A").await.unwrap();
    a.create_federation_execution("fed", vec![], TIME_FACTORY_FLOAT64)
        .await
        .unwrap();
    a.create_federation_execution("other", vec![], TIME_FACTORY_FLOAT64)
        .await
        .unwrap();

    let names: BTreeSet<String> = a
        .list_federation_executions()
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(names.contains("fed"));
    assert!(names.contains("other"));
}
