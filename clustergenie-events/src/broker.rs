//! In-process pub/sub broker.
//!
//! Backs the live read path (SSE/WebSocket). Each subscriber gets a bounded
//! channel of 16 events; a slow subscriber loses events rather than ever
//! blocking the publisher.

use crate::event::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

const SUBSCRIBER_BUFFER: usize = 16;

#[derive(Default)]
pub struct Broker {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

impl Broker {
    pub fn new() -> Broker {
        Broker::default()
    }

    /// Register a subscriber. Dropping the receiver unsubscribes it; closed
    /// channels are swept on the next publish.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(id, tx);
        rx
    }

    /// Broadcast to all subscribers without blocking; full buffers drop the
    /// event for that subscriber.
    pub fn publish(&self, event: &Event) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(subscriber = id, "dropping event for slow subscriber");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let broker = Broker::new();
        let mut rx1 = broker.subscribe();
        let mut rx2 = broker.subscribe();

        broker.publish(&Event::new(EventKind::JobStarted));

        assert_eq!(rx1.recv().await.unwrap().kind, EventKind::JobStarted);
        assert_eq!(rx2.recv().await.unwrap().kind, EventKind::JobStarted);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_but_never_blocks() {
        let broker = Broker::new();
        let mut rx = broker.subscribe();

        for i in 0..40 {
            broker.publish(&Event::new(EventKind::JobProgress).with_progress(i, "tick"));
        }

        // only the first 16 made it into the buffer
        let mut received = 0;
        while let Ok(e) = rx.try_recv() {
            assert_eq!(e.progress, Some(received));
            received += 1;
        }
        assert_eq!(received, 16);
    }

    #[tokio::test]
    async fn dropped_receivers_are_swept() {
        let broker = Broker::new();
        let rx = broker.subscribe();
        drop(rx);
        broker.publish(&Event::new(EventKind::JobCompleted));
        assert_eq!(broker.subscriber_count(), 0);
    }
}
