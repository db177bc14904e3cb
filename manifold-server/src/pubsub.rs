//! Model-summary pub/sub hub.
//!
//! Each subscriber owns a bounded queue; publishing never blocks the
//! watcher — when a subscriber's queue is full the message is dropped for
//! that subscriber and counted. The lock only guards the subscriber list.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use manifold_client::params::ModelAbstract;

use crate::metrics::Metrics;

/// Queue depth per subscriber.
const SUBSCRIBER_QUEUE: usize = 64;

/// One published event: a model UUID and its latest abstract.
pub type SummaryEvent = (String, ModelAbstract);

struct Subscriber {
    id: u64,
    /// When set, only these model UUIDs are delivered.
    models: Option<HashSet<String>>,
    tx: mpsc::Sender<SummaryEvent>,
}

/// Fan-out hub for model summaries.
pub struct Hub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    metrics: Metrics,
}

impl Hub {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Subscribe, optionally restricted to a set of model UUIDs.
    pub fn subscribe(
        &self,
        models: Option<HashSet<String>>,
    ) -> (u64, mpsc::Receiver<SummaryEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.push(Subscriber { id, models, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.retain(|s| s.id != id);
    }

    /// Deliver to every interested subscriber; slow subscribers drop.
    pub fn publish(&self, model_uuid: &str, summary: &ModelAbstract) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.lock().expect("hub lock poisoned");
            for subscriber in subscribers.iter() {
                if let Some(models) = &subscriber.models {
                    if !models.contains(model_uuid) {
                        continue;
                    }
                }
                match subscriber
                    .tx
                    .try_send((model_uuid.to_string(), summary.clone()))
                {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.metrics.pubsub_dropped.inc();
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(subscriber.id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
            subscribers.retain(|s| !closed.contains(&s.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Hub {
        Hub::new(Metrics::new().unwrap())
    }

    fn event(uuid: &str) -> ModelAbstract {
        ModelAbstract {
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn filtered_subscribers_see_their_models_only() {
        let hub = hub();
        let (_, mut rx) = hub.subscribe(Some(["m1".to_string()].into_iter().collect()));

        hub.publish("m2", &event("m2"));
        hub.publish("m1", &event("m1"));

        let (uuid, _) = rx.recv().await.unwrap();
        assert_eq!(uuid, "m1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscribers_drop_instead_of_blocking() {
        let hub = hub();
        let (_, mut rx) = hub.subscribe(None);
        for i in 0..(SUBSCRIBER_QUEUE + 10) {
            hub.publish(&format!("m{i}"), &event("x"));
        }
        // The queue holds the first SUBSCRIBER_QUEUE events; the rest were
        // dropped without blocking the publisher.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = hub();
        let (id, mut rx) = hub.subscribe(None);
        hub.unsubscribe(id);
        hub.publish("m1", &event("m1"));
        assert!(rx.try_recv().is_err());
    }
}
