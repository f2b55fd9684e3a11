//! # ClusterGenie Events
//!
//! Event plumbing for the control plane:
//!
//! - **Envelope**: the canonical [`Event`] shape with a typed kind
//!   discriminant; maps stay at the JSON edge.
//! - **Broker**: in-process fan-out for live consumers (SSE/WebSocket), with
//!   bounded per-subscriber buffers and drop-on-overflow.
//! - **Bus**: every publish lands on the durable topic (Kafka, keyed by job
//!   id) and on the broker. A channel-backed bus with identical semantics
//!   serves broker-less deployments and tests.
//! - **Consumer**: decodes committed messages into events and dispatches them
//!   to an [`EventSink`]; handler failures log and continue.

pub mod broker;
pub mod bus;
pub mod event;
pub mod kafka;

pub use broker::Broker;
pub use bus::{run_consumer, EventPublisher, EventSink, LocalEventBus};
pub use event::{Event, EventKind};
pub use kafka::{KafkaEventBus, KafkaEventConsumer};

/// Topic carrying job/droplet/metric events.
pub const CLUSTER_EVENTS_TOPIC: &str = "cluster-events";
/// Topic carrying deployment lifecycle events.
pub const DEPLOYMENTS_TOPIC: &str = "deployments";
