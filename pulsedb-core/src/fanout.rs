//! Synchronous fan-out of written points to subscribers

use crate::types::DataPoint;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked with every published point.
pub type ConsumerCallback = Arc<dyn Fn(&DataPoint) + Send + Sync>;

/// A registered subscriber.
#[derive(Clone)]
pub struct Consumer {
    id: u64,
    callback: ConsumerCallback,
}

impl Consumer {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Delivers each published point synchronously to every subscriber
/// registered at the time of the call.
///
/// There is no backpressure: a slow callback stalls the publisher, and
/// therefore the write path. Callers with slow sinks must offload
/// internally (the TCP layer forwards into a channel for this reason).
#[derive(Default)]
pub struct FanoutBus {
    consumers: RwLock<Vec<Consumer>>,
}

impl FanoutBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. IDs should be unique; the bus does not
    /// enforce it.
    pub fn add_consumer(&self, id: u64, callback: impl Fn(&DataPoint) + Send + Sync + 'static) {
        debug!(consumer = id, "adding consumer");
        self.consumers.write().push(Consumer {
            id,
            callback: Arc::new(callback),
        });
    }

    /// Deregister every subscriber with `id`.
    pub fn remove_consumer(&self, id: u64) {
        debug!(consumer = id, "removing consumer");
        self.consumers.write().retain(|c| c.id != id);
    }

    /// Snapshot of the currently registered consumers.
    pub fn consumers(&self) -> Vec<Consumer> {
        self.consumers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.consumers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.read().is_empty()
    }

    /// Deliver `point` to the snapshot of consumers at call time, in
    /// registration order. Returns only after every callback ran once.
    /// A panicking callback is caught and logged; delivery continues.
    pub fn publish(&self, point: &DataPoint) {
        let snapshot = self.consumers();
        for consumer in snapshot {
            let delivery = catch_unwind(AssertUnwindSafe(|| (consumer.callback)(point)));
            if delivery.is_err() {
                warn!(
                    consumer = consumer.id,
                    key = %point.key,
                    "subscriber callback panicked, skipping"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn point() -> DataPoint {
        DataPoint::new("e", 1, 7.0)
    }

    #[test]
    fn test_publish_reaches_all_consumers() {
        let bus = FanoutBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        bus.add_consumer(1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        bus.add_consumer(2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&point());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_consumer_stops_delivery() {
        let bus = FanoutBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.add_consumer(7, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&point());
        bus.remove_consumer(7);
        bus.publish(&point());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_consumer_added_after_snapshot_misses_message() {
        let bus = FanoutBus::new();
        assert_eq!(bus.consumers().len(), 0);
        bus.add_consumer(1, |_| {});
        assert_eq!(bus.consumers().len(), 1);
        assert_eq!(bus.consumers()[0].id(), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_delivery() {
        let bus = FanoutBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.add_consumer(1, |_| panic!("subscriber went away"));
        let counter = hits.clone();
        bus.add_consumer(2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&point());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_from_multiple_publishers() {
        let bus = Arc::new(FanoutBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.add_consumer(1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        bus.publish(&point());
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }
}
