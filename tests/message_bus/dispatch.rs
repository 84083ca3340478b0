use std::collections::BTreeSet;

use kafka_message_bus::broker::{
    ErrorCode, InMemoryBroker, PublishFlags, CORRELATION_ID_HEADER, QUEUE_BUFFERING_MAX_MESSAGES,
};
use kafka_message_bus::provider::message_from_headers;
use kafka_message_bus::{BusError, Message, MessageDispatcher};

use crate::support::{config, dispatcher};

#[test]
fn dispatched_record_reconstructs_the_same_identity() {
    let broker = InMemoryBroker::new();
    let parent = Message::new("orders.placed", None);
    let message = Message::caused_by(&parent, "Orders\\Created", Some(b"{\"total\":42}".to_vec()));

    dispatcher(&broker).dispatch(message.clone()).unwrap();

    let records = broker.records("Orders.Created");
    let rebuilt = message_from_headers(&records[0]).unwrap();
    assert_eq!(rebuilt.message_id(), message.message_id());
    assert_eq!(rebuilt.correlation_id(), message.correlation_id());
    assert_eq!(rebuilt.causation_id(), message.causation_id());
    assert_eq!(rebuilt.content(), message.content());
    assert_eq!(rebuilt.timestamp(), message.timestamp());
    assert_eq!(rebuilt.name(), "Orders.Created");
}

#[test]
fn failed_delivery_carries_decoded_reason() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker);
    broker.fail_deliveries("orders", ErrorCode::MessageTimedOut);

    let err = dispatcher.dispatch(Message::new("orders", None)).unwrap_err();
    assert_eq!(err.to_string(), "Kafka.Producer error: Local: Message timed out");

    broker.restore_deliveries("orders");
    dispatcher.dispatch(Message::new("orders", None)).unwrap();
    assert_eq!(broker.records("orders").len(), 1);
    assert!(!dispatcher.delivery_report().unwrap().is_error());
}

#[test]
fn client_errors_reach_the_dispatch_caller() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker);
    broker.inject_client_error(ErrorCode::AllBrokersDown, "1/1 brokers are down");

    let err = dispatcher.dispatch(Message::new("orders", None)).unwrap_err();
    assert!(matches!(
        err,
        BusError::Client { code: ErrorCode::AllBrokersDown, ref reason, .. } if reason == "1/1 brokers are down"
    ));
    assert!(broker.records("orders").is_empty());

    dispatcher.dispatch(Message::new("orders", None)).unwrap();
    assert_eq!(broker.records("orders").len(), 1);
}

#[test]
fn delivery_report_tracks_the_latest_dispatch() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker);

    let first = dispatcher.dispatch(Message::new("orders", None)).unwrap();
    let second = dispatcher.dispatch(Message::new("orders", None)).unwrap();

    let report = dispatcher.delivery_report().unwrap();
    assert_ne!(report.opaque.as_deref(), Some(first.message_id()));
    assert_eq!(report.opaque.as_deref(), Some(second.message_id()));
    assert_eq!(report.offset, 1);
}

#[test]
fn full_queue_rejects_non_blocking_publish() {
    let broker = InMemoryBroker::new();
    let mut small = config();
    small.set(QUEUE_BUFFERING_MAX_MESSAGES, "1");

    let batch = || vec![Message::new("orders", None), Message::new("orders", None)];

    let dispatcher = MessageDispatcher::new(broker.clone(), small.clone()).with_flags(PublishFlags::NONE);
    let err = dispatcher.dispatch_batch(batch()).unwrap_err();
    assert!(matches!(err, BusError::Publish { code: ErrorCode::QueueFull, .. }));

    let blocking = MessageDispatcher::new(broker.clone(), small);
    blocking.dispatch_batch(batch()).unwrap();
    assert_eq!(broker.records("orders").len(), 2);
}

#[test]
fn correlated_messages_share_a_partition() {
    let broker = InMemoryBroker::with_partitions(4);
    let dispatcher = dispatcher(&broker);
    let root = Message::new("orders", None);

    dispatcher.dispatch(root.clone()).unwrap();
    for _ in 0..5 {
        dispatcher
            .dispatch(Message::caused_by(&root, "orders", None))
            .unwrap();
    }

    let records = broker.records("orders");
    assert_eq!(records.len(), 6);
    let partitions: BTreeSet<i32> = records.iter().map(|record| record.partition).collect();
    assert_eq!(partitions.len(), 1);
    assert!(records
        .iter()
        .all(|record| record.header(CORRELATION_ID_HEADER) == Some(root.correlation_id())));
}
