use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kafka_message_bus::broker::{
    ClientConfig, CommitMode, Consumer, InMemoryBroker, TopicPartition,
};
use kafka_message_bus::{
    BusError, CommitProvider, Message, MessageDispatcher, MessageProcessor, ProcessorSettings,
};

use crate::support::{config, draining_processor, processor, publish, Recorder, GROUP};

fn counting_commit(count: &Arc<AtomicUsize>) -> Arc<dyn CommitProvider> {
    let count = Arc::clone(count);
    Arc::new(move |consumer: &mut dyn Consumer| {
        count.fetch_add(1, Ordering::SeqCst);
        consumer.commit(CommitMode::Sync)
    })
}

#[test]
fn shutdown_lets_the_current_record_finish() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders", "orders", "orders"]);

    let commits = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder::new();
    let mut processor = processor(&broker)
        .with_auto_commit(false)
        .with_commit_provider(counting_commit(&commits));
    let handle = processor.subscription_handle();
    processor
        .on("orders", move |_: &Message| {
            handle.unsubscribe();
            Ok(())
        })
        .unwrap()
        .add_handler("orders", recorder.handler("after-stop"))
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(recorder.seen(), vec!["after-stop:orders"]);
    assert_eq!(commits.load(Ordering::SeqCst), 1);
    assert_eq!(broker.committed_offset(GROUP, "orders", 0), Some(1));
    assert_eq!(broker.closed_consumers(), 1);
    assert!(!processor.is_subscribed());
}

#[test]
fn unbounded_poll_timeout_still_serves_records() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders"]);

    let recorder = Recorder::new();
    let mut processor = processor(&broker).with_timeout(Duration::MAX);
    let handle = processor.subscription_handle();
    processor
        .add_handler("orders", recorder.handler("orders"))
        .unwrap()
        .on("orders", move |_: &Message| {
            handle.unsubscribe();
            Ok(())
        })
        .unwrap();

    processor.handle(None).unwrap();
    assert_eq!(recorder.seen(), vec!["orders:orders"]);
    assert_eq!(broker.closed_consumers(), 1);
}

#[test]
fn commit_provider_is_skipped_under_auto_commit() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders", "orders"]);

    let commits = Arc::new(AtomicUsize::new(0));
    let mut processor = draining_processor(&broker).with_commit_provider(counting_commit(&commits));
    processor.on("orders", |_: &Message| Ok(())).unwrap();

    processor.handle(None).unwrap();

    assert_eq!(commits.load(Ordering::SeqCst), 0);
    assert_eq!(broker.committed_offset(GROUP, "orders", 0), Some(2));
}

#[test]
fn manual_commit_without_provider_commits_nothing() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders"]);

    let mut processor = draining_processor(&broker).with_auto_commit(false);
    processor.on("orders", |_: &Message| Ok(())).unwrap();

    processor.handle(None).unwrap();

    assert_eq!(broker.committed_offset(GROUP, "orders", 0), None);
}

#[test]
fn a_new_run_resumes_from_committed_offsets() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders", "orders"]);

    let first = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor.add_handler("orders", first.handler("first")).unwrap();
    processor.handle(None).unwrap();
    assert_eq!(first.seen().len(), 2);

    publish(&broker, &["orders"]);

    let second = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor.add_handler("orders", second.handler("second")).unwrap();
    processor.handle(None).unwrap();
    assert_eq!(second.seen(), vec!["second:orders"]);
}

#[test]
fn set_subscribe_rearms_a_stopped_processor() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders"]);

    let recorder = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor.add_handler("orders", recorder.handler("orders")).unwrap();

    processor.handle(None).unwrap();
    assert!(!processor.is_subscribed());

    publish(&broker, &["orders"]);

    // Still stopped: subscribes, then exits straight away.
    processor.handle(None).unwrap();
    assert_eq!(recorder.seen().len(), 1);

    processor.set_subscribe(true);
    processor.handle(None).unwrap();
    assert_eq!(recorder.seen().len(), 2);
    assert_eq!(broker.closed_consumers(), 3);
}

#[test]
fn explicit_partitions_bypass_group_assignment() {
    let broker = InMemoryBroker::new();
    broker.create_topic("orders", 2);
    for partition in 0..2 {
        MessageDispatcher::new(broker.clone(), config())
            .with_partition(partition)
            .dispatch(Message::new("orders", Some(format!("p{}", partition).into_bytes())))
            .unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut processor = draining_processor(&broker)
        .with_partitions(vec![TopicPartition::new("orders", 1)]);
    processor
        .on("orders", move |message: &Message| {
            sink.lock()
                .unwrap()
                .push(message.content_str().unwrap_or_default().to_string());
            Ok(())
        })
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["p1".to_string()]);
    assert_eq!(broker.committed_offset(GROUP, "orders", 0), None);
    assert_eq!(broker.committed_offset(GROUP, "orders", 1), Some(1));
}

#[test]
fn processor_stops_from_another_thread() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders"]);

    let (tx, rx) = channel();
    let mut processor = processor(&broker);
    let handle = processor.subscription_handle();
    processor
        .on("orders", move |message: &Message| {
            tx.send(message.message_id().to_string())?;
            Ok(())
        })
        .unwrap();

    let worker = thread::spawn(move || processor.handle(None));

    let handled = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!handled.is_empty());

    handle.unsubscribe();
    worker.join().unwrap().unwrap();
    assert_eq!(broker.closed_consumers(), 1);
}

#[test]
fn configuration_errors_surface_before_the_loop() {
    let broker = InMemoryBroker::new();

    let mut missing_servers = MessageProcessor::new(broker.clone(), ClientConfig::new(), GROUP);
    missing_servers.on("orders", |_: &Message| Ok(())).unwrap();
    assert!(matches!(missing_servers.handle(None), Err(BusError::Configuration(_))));

    let mut nothing_registered = MessageProcessor::new(broker.clone(), config(), GROUP);
    assert!(matches!(nothing_registered.handle(None), Err(BusError::Configuration(_))));

    let mut bad_flag = config();
    bad_flag.set("enable.partition.eof", "maybe");
    let mut invalid = MessageProcessor::new(broker, bad_flag, GROUP);
    invalid.on("orders", |_: &Message| Ok(())).unwrap();
    assert!(matches!(invalid.handle(None), Err(BusError::Configuration(_))));
}

#[test]
fn settings_build_a_working_processor() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders", "orders"]);

    let settings = ProcessorSettings::from_json(
        r#"{
            "group_id": "Billing Service",
            "auto_offset_reset": "earliest",
            "auto_commit": false,
            "timeout_ms": 10,
            "commit_provider": "sync",
            "message_provider": "headers"
        }"#,
    )
    .unwrap();
    let mut processor = MessageProcessor::from_settings(broker.clone(), &settings).unwrap();
    assert_eq!(processor.group_id(), Some("Billing_Service"));

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let handle = processor.subscription_handle();
    processor
        .on("orders", move |_: &Message| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                handle.unsubscribe();
            }
            Ok(())
        })
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 2);
    assert_eq!(broker.committed_offset("Billing_Service", "orders", 0), Some(2));

    let unknown = ProcessorSettings {
        error_provider: Some("retry".into()),
        ..ProcessorSettings::default()
    };
    let err = MessageProcessor::from_settings(broker, &unknown).err().unwrap();
    assert!(matches!(err, BusError::UnknownProvider { kind: "error", .. }));
}
