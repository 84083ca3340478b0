//! Message bus integration tests.
//!
//! Everything runs against the in-memory broker, so dispatch, routing and the
//! consume loop are exercised end to end without a Kafka cluster.

mod support;
mod dispatch;
mod routing;
mod lifecycle;
