//! Producer creation/destruction handshake against the mock control plane

use network::{BusMessage, MemoryTransport, Transport, TransportError};
use station_producer::test_utils::{json_schema, wait_for_schema_updates, MockControlPlane};
use station_producer::{
    ClientConfig, Connection, ProducerConfig, ProducerError, ProducerState, SchemaUpdate,
};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (MemoryTransport, MockControlPlane, Connection) {
    let bus = MemoryTransport::new();
    let control = MockControlPlane::install(&bus);
    let config = ClientConfig::default()
        .with_connection_id("conn-test")
        .with_request_timeout(Duration::from_millis(100))
        .unwrap();
    let connection = Connection::new(Arc::new(bus.clone()), config).unwrap();
    (bus, control, connection)
}

#[tokio::test]
async fn test_create_sends_registration_request() {
    let (bus, control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();

    assert_eq!(producer.name(), "p1");
    assert_eq!(producer.station(), "orders");
    assert_eq!(producer.state(), ProducerState::Active);

    let created = control.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "p1");
    assert_eq!(created[0].station_name, "orders");
    assert_eq!(created[0].connection_id, "conn-test");
    assert_eq!(created[0].producer_type, "application");

    // Relay subscription is up before and after the handshake
    assert_eq!(bus.subscription_count("schema-updates.orders"), 1);
}

#[tokio::test]
async fn test_unique_suffix_name() {
    let (_bus, control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p2", ProducerConfig::new().with_unique_suffix())
        .await
        .unwrap();

    let suffix = producer.name().strip_prefix("p2_").unwrap();
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(control.created()[0].name, producer.name());
}

#[tokio::test]
async fn test_initial_snapshot_precedes_later_updates() {
    let (_bus, control, connection) = setup();
    control.set_schema("orders", json_schema("orders-v1", ""));

    let _producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();

    control.push_schema_update("orders", &SchemaUpdate::Drop);

    let events =
        wait_for_schema_updates(&connection, "orders", 2, Duration::from_secs(1)).await;
    assert_eq!(
        events,
        vec![
            SchemaUpdate::Init(json_schema("orders-v1", "")),
            SchemaUpdate::Drop
        ]
    );
}

#[tokio::test]
async fn test_schema_less_station_yields_empty_init_only() {
    let (_bus, _control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();

    let events = connection.drain_schema_updates("orders").await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].has_schema());
    assert!(producer.schema_details().await.unwrap().is_none());
}

#[tokio::test]
async fn test_broker_rejection_rolls_back_relay() {
    let (bus, control, connection) = setup();
    control.reject_creations("station orders does not exist");

    let err = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap_err();

    match err {
        ProducerError::BrokerRejected(reason) => {
            assert_eq!(reason, "station orders does not exist")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);
    assert_eq!(connection.schema_listener_count("orders").await, 0);
    assert!(control.created().is_empty());
}

#[tokio::test]
async fn test_missing_control_plane_rolls_back_relay() {
    let bus = MemoryTransport::new();
    let connection = Connection::new(Arc::new(bus.clone()), ClientConfig::default()).unwrap();

    let err = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProducerError::Transport(TransportError::NoResponders { .. })
    ));
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let (bus, _control, connection) = setup();

    // Closing after the relay subscribed makes the rollback unsubscribe fail
    bus.register_responder("producer-creations", {
        let bus = bus.clone();
        move |_: &BusMessage| {
            bus.close();
            Some(br#"{"error":"denied"}"#.to_vec().into())
        }
    });

    let err = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap_err();

    match err {
        ProducerError::RollbackFailed { cause, rollback } => {
            assert!(matches!(*cause, ProducerError::BrokerRejected(_)));
            assert!(rollback.is_transport_error());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_destroy_removes_relay_and_deregisters() {
    let (bus, control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();
    producer.destroy().await.unwrap();

    assert_eq!(producer.state(), ProducerState::Destroyed);
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);

    let destroyed = control.destroyed();
    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].name, "p1");
    assert_eq!(destroyed[0].station_name, "orders");
}

#[tokio::test]
async fn test_second_destroy_fails_with_no_active_listener() {
    let (_bus, control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();
    producer.destroy().await.unwrap();

    let err = producer.destroy().await.unwrap_err();
    assert!(matches!(err, ProducerError::NoActiveListener { .. }));
    assert_eq!(control.destroyed().len(), 1);
}

#[tokio::test]
async fn test_producers_share_station_relay() {
    let (bus, _control, connection) = setup();

    let p1 = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();
    let p2 = connection
        .create_producer("orders", "p2", ProducerConfig::default())
        .await
        .unwrap();

    assert_eq!(bus.subscription_count("schema-updates.orders"), 1);
    assert_eq!(connection.schema_listener_count("orders").await, 2);

    p1.destroy().await.unwrap();
    assert!(p1.destroy().await.is_err());
    assert_eq!(connection.schema_listener_count("orders").await, 1);
    assert_eq!(bus.subscription_count("schema-updates.orders"), 1);

    p2.destroy().await.unwrap();
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);
}

#[tokio::test]
async fn test_concurrent_creation_on_distinct_stations() {
    let (bus, control, connection) = setup();

    let stations = ["orders", "payments", "refunds", "audit"];
    let handles: Vec<_> = stations
        .into_iter()
        .map(|station| {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .create_producer(station, "worker", ProducerConfig::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(control.created().len(), stations.len());
    for station in stations {
        assert_eq!(
            bus.subscription_count(&format!("schema-updates.{station}")),
            1
        );
    }
}

#[tokio::test]
async fn test_destroy_rejected_by_broker() {
    let (_bus, control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();
    control.reject_destructions("producer p1 not found");

    let err = producer.destroy().await.unwrap_err();
    assert!(matches!(err, ProducerError::BrokerRejected(ref r) if r == "producer p1 not found"));
    assert_eq!(producer.state(), ProducerState::Destroyed);
}

#[tokio::test]
async fn test_relay_teardown_failure_skips_broker_destroy() {
    let (bus, control, connection) = setup();

    let producer = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();
    bus.close();

    let err = producer.destroy().await.unwrap_err();
    assert!(err.is_transport_error());
    assert!(control.destroyed().is_empty());
    assert!(!bus.is_connected());
}

#[tokio::test]
async fn test_relay_recovers_from_dropped_subscription() {
    let (bus, control, connection) = setup();

    let p1 = connection
        .create_producer("orders", "p1", ProducerConfig::default())
        .await
        .unwrap();

    // The broker drops the relay's subscription behind the client's back
    bus.unsubscribe(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);

    let p2 = connection
        .create_producer("orders", "p2", ProducerConfig::default())
        .await
        .unwrap();
    assert_eq!(connection.schema_listener_count("orders").await, 2);
    assert_eq!(bus.subscription_count("schema-updates.orders"), 1);

    let reached = control.push_schema_update("orders", &SchemaUpdate::Init(json_schema("v2", "")));
    assert_eq!(reached, 1);

    // Two creation snapshots, then the pushed schema
    let events = wait_for_schema_updates(&connection, "orders", 3, Duration::from_secs(1)).await;
    assert_eq!(events.len(), 3);
    let details = p2.schema_details().await.unwrap().unwrap();
    assert_eq!(details.schema_name, "v2");

    p1.destroy().await.unwrap();
    p2.destroy().await.unwrap();

    let destroyed: Vec<_> = control.destroyed().into_iter().map(|r| r.name).collect();
    assert_eq!(destroyed, vec!["p1", "p2"]);
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_and_destroy_on_one_station() {
    const PRODUCERS: usize = 16;
    let (bus, control, connection) = setup();

    let creates: Vec<_> = (0..PRODUCERS)
        .map(|i| {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .create_producer("orders", &format!("worker-{i}"), ProducerConfig::default())
                    .await
            })
        })
        .collect();

    let mut producers = Vec::with_capacity(PRODUCERS);
    for handle in creates {
        producers.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(connection.schema_listener_count("orders").await, PRODUCERS);
    assert_eq!(bus.subscription_count("schema-updates.orders"), 1);
    assert_eq!(control.created().len(), PRODUCERS);

    let destroys: Vec<_> = producers
        .into_iter()
        .map(|producer| tokio::spawn(async move { producer.destroy().await }))
        .collect();
    for handle in destroys {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(connection.schema_listener_count("orders").await, 0);
    assert_eq!(bus.subscription_count("schema-updates.orders"), 0);
    assert_eq!(control.destroyed().len(), PRODUCERS);
}
