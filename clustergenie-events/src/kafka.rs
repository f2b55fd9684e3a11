//! Kafka-backed event bus.
//!
//! Events for one job share the job id as partition key, which preserves the
//! per-job `job_started → job_progress → job_completed` order. The consumer
//! decodes committed messages into the canonical envelope and hands them to a
//! sink; decode and handler failures are logged and the stream continues.

use crate::broker::Broker;
use crate::bus::{EventPublisher, EventSink};
use crate::event::Event;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct KafkaEventBus {
    producer: FutureProducer,
    broker: Arc<Broker>,
}

impl KafkaEventBus {
    pub fn new(brokers: &[String], broker: Arc<Broker>) -> Result<KafkaEventBus> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()
            .context("failed to create kafka producer")?;
        info!("🔌 Kafka producer connected to {}", brokers.join(","));
        Ok(KafkaEventBus { producer, broker })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventBus {
    async fn publish(&self, topic: &str, key: &str, event: &Event) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.producer
            .send(
                FutureRecord::to(topic).key(key).payload(&payload),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(e, _)| anyhow::anyhow!("failed to publish to {}: {}", topic, e))?;

        // local fan-out so SSE/WebSocket clients see the event immediately
        self.broker.publish(event);
        Ok(())
    }
}

pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
}

impl KafkaEventConsumer {
    pub fn new(brokers: &[String], topic: &str, group_id: &str) -> Result<KafkaEventConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .context("failed to create kafka consumer")?;
        consumer
            .subscribe(&[topic])
            .with_context(|| format!("failed to subscribe to {}", topic))?;
        info!("🔌 Kafka consumer subscribed to {}", topic);
        Ok(KafkaEventConsumer { consumer })
    }

    /// Consume committed messages forever, dispatching each decoded event to
    /// the sink.
    pub async fn run(self, sink: Arc<dyn EventSink>) {
        loop {
            match self.consumer.recv().await {
                Err(e) => {
                    error!("error reading message: {}", e);
                }
                Ok(message) => {
                    let Some(payload) = message.payload() else {
                        continue;
                    };
                    match serde_json::from_slice::<Event>(payload) {
                        Err(e) => error!("error decoding event: {}", e),
                        Ok(event) => {
                            let kind = event.kind.clone();
                            if let Err(e) = sink.handle(event).await {
                                error!(kind = kind.as_str(), "error handling event: {:#}", e);
                            }
                        }
                    }
                }
            }
        }
    }
}
