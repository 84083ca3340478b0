use std::sync::{Arc, Mutex};

use kafka_message_bus::broker::InMemoryBroker;
use kafka_message_bus::{Message, MessageDispatcher};

use crate::support::{config, draining_processor, publish, Recorder};

#[test]
fn exact_topic_shadows_matching_patterns() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders.created", "orders.shipped"]);

    let recorder = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor
        .add_handler("orders.created", recorder.handler("exact"))
        .unwrap()
        .add_handler(r"^orders\..*", recorder.handler("pattern"))
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(
        recorder.seen(),
        vec!["exact:orders.created", "pattern:orders.shipped"]
    );
}

#[test]
fn duplicate_registration_runs_twice() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders.created"]);

    let recorder = Recorder::new();
    let handler = recorder.handler("audit");
    let mut processor = draining_processor(&broker);
    processor
        .add_handler("orders.created", Arc::clone(&handler))
        .unwrap()
        .add_handler("orders.created", handler)
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(
        recorder.seen(),
        vec!["audit:orders.created", "audit:orders.created"]
    );
}

#[test]
fn matching_patterns_merge_handlers_by_position() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders.shipped"]);

    let recorder = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor
        .add_handler(r"^orders\..*", recorder.handler("orders"))
        .unwrap()
        .add_handler(r"^.*\.shipped$", recorder.handler("shipping"))
        .unwrap()
        .add_handler(r"^.*\.shipped$", recorder.handler("tracking"))
        .unwrap()
        .add_handler(r"^invoices\..*", recorder.handler("invoices"))
        .unwrap();

    processor.handle(None).unwrap();

    // "shipping" sits at a position already taken by "orders".
    assert_eq!(
        recorder.seen(),
        vec!["orders:orders.shipped", "tracking:orders.shipped"]
    );
}

#[test]
fn narrow_subscribe_only_reads_the_message_topic() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders.created", "invoices.sent"]);

    let recorder = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor
        .add_handler("orders.created", recorder.handler("orders"))
        .unwrap()
        .add_handler("invoices.sent", recorder.handler("invoices"))
        .unwrap();

    processor
        .handle(Some(&Message::new("orders.created", None)))
        .unwrap();

    assert_eq!(recorder.seen(), vec!["orders:orders.created"]);
}

#[test]
fn domain_names_route_through_the_normalized_topic() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["Billing\\Invoice Sent"]);
    assert_eq!(broker.topics(), vec!["Billing.Invoice_Sent"]);

    let recorder = Recorder::new();
    let mut processor = draining_processor(&broker);
    let registered = Message::new("Billing\\Invoice Sent", None);
    processor
        .add_handler_for(&registered, recorder.handler("billing"))
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(recorder.seen(), vec!["billing:Billing.Invoice_Sent"]);
}

#[test]
fn json_envelope_keeps_the_domain_name() {
    let broker = InMemoryBroker::new();
    let mut dispatcher = MessageDispatcher::new(broker.clone(), config());
    dispatcher.set_payload_provider_named("json").unwrap();
    let sent = dispatcher
        .dispatch(Message::new("Billing\\Invoice Sent", Some(b"{}".to_vec())))
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let mut processor = draining_processor(&broker);
    processor.set_message_provider_named("json").unwrap();
    processor
        .on("Billing\\Invoice Sent", move |message: &Message| {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        })
        .unwrap();

    processor.handle(None).unwrap();

    assert_eq!(*received.lock().unwrap(), vec![sent]);
}

#[test]
fn cleared_topics_are_no_longer_routed() {
    let broker = InMemoryBroker::new();
    publish(&broker, &["orders.created"]);

    let recorder = Recorder::new();
    let mut processor = draining_processor(&broker);
    processor
        .add_handler("orders.created", recorder.handler("exact"))
        .unwrap()
        .add_handler(r"^orders\..*", recorder.handler("pattern"))
        .unwrap();
    assert!(processor.clear_handlers("orders.created"));

    processor.handle(None).unwrap();

    assert_eq!(recorder.seen(), vec!["pattern:orders.created"]);
}
