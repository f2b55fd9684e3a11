//! Event bus traits and the in-process backend.
//!
//! Publishing is dual-tier on every backend: the durable topic is the
//! committed fact, and the broker fans the same payload out to local
//! subscribers. Callers cannot opt out of either tier.

use crate::broker::Broker;
use crate::event::Event;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

/// Publisher side of the event bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver `event` to `(topic, key)` and fan it out locally. Delivery to
    /// the durable tier is the committed fact; an error means the event was
    /// not committed.
    async fn publish(&self, topic: &str, key: &str, event: &Event) -> Result<()>;
}

/// Consumer-side handler for committed events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

/// Channel-backed event bus used when no broker list is configured and by the
/// test suites. A single FIFO per topic preserves per-key ordering trivially.
pub struct LocalEventBus {
    broker: Arc<Broker>,
    routes: RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>,
}

impl LocalEventBus {
    pub fn new(broker: Arc<Broker>) -> LocalEventBus {
        LocalEventBus {
            broker,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a consumer queue for `topic`. Events published to other topics
    /// still reach the broker tier.
    pub fn subscribe_topic(&self, topic: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(topic.to_string(), tx);
        rx
    }
}

#[async_trait]
impl EventPublisher for LocalEventBus {
    async fn publish(&self, topic: &str, _key: &str, event: &Event) -> Result<()> {
        if let Some(tx) = self.routes.read().get(topic) {
            // a dropped consumer is not a publish failure in local mode
            let _ = tx.send(event.clone());
        }
        self.broker.publish(event);
        Ok(())
    }
}

/// Drain a consumer queue into a sink. Handler failures are logged and the
/// loop continues; messages are not re-queued.
pub async fn run_consumer(mut rx: mpsc::UnboundedReceiver<Event>, sink: Arc<dyn EventSink>) {
    while let Some(event) = rx.recv().await {
        let kind = event.kind.clone();
        if let Err(e) = sink.handle(event).await {
            error!(kind = kind.as_str(), "event handler failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for Counting {
        async fn handle(&self, _event: Event) -> Result<()> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transient");
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_topic_consumer_and_broker() {
        let broker = Arc::new(Broker::new());
        let bus = LocalEventBus::new(broker.clone());
        let mut topic_rx = bus.subscribe_topic("cluster-events");
        let mut live_rx = broker.subscribe();

        bus.publish("cluster-events", "job-1", &Event::new(EventKind::JobStarted))
            .await
            .unwrap();

        assert_eq!(topic_rx.recv().await.unwrap().kind, EventKind::JobStarted);
        assert_eq!(live_rx.recv().await.unwrap().kind, EventKind::JobStarted);
    }

    #[tokio::test]
    async fn consumer_continues_past_handler_failures() {
        let broker = Arc::new(Broker::new());
        let bus = LocalEventBus::new(broker);
        let rx = bus.subscribe_topic("cluster-events");

        let sink = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        });
        let consumer = tokio::spawn(run_consumer(rx, sink.clone()));

        for _ in 0..3 {
            bus.publish("cluster-events", "k", &Event::new(EventKind::JobProgress))
                .await
                .unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sink.seen.load(Ordering::SeqCst), 2);
        consumer.abort();
    }
}
