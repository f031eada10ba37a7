#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! In-process publish/subscribe bus.
//!
//! The bus delivers every published event synchronously, in the
//! publisher's task, in subscriber registration order. Pipelines rely on
//! this: a `not_ready!` transition published while handling an event is
//! observed by every subscriber before the next event is pushed.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

/// Topic names that are part of the data-pump wire contract.
pub mod topics {
    /// Published when a pipeline starts.
    pub const PIPELINE_START: &str = "bspump.pipeline.start!";
    /// Published when a pipeline becomes ready.
    pub const PIPELINE_READY: &str = "bspump.pipeline.ready!";
    /// Published when a pipeline stops being ready.
    pub const PIPELINE_NOT_READY: &str = "bspump.pipeline.not_ready!";
    /// Published when a pipeline enters the error state.
    pub const PIPELINE_ERROR: &str = "bspump.pipeline.error!";
    /// Published when the error state of a pipeline is cleared.
    pub const PIPELINE_CLEAR_ERROR: &str = "bspump.pipeline.clear_error!";
    /// Published when a soft processing error is absorbed.
    pub const PIPELINE_WARNING: &str = "bspump.pipeline.warning!";
    /// Published by a trigger-driven source after each completed cycle.
    pub const PIPELINE_CYCLE_END: &str = "bspump.pipeline.cycle_end!";
    /// Published by the host for every metric on each flush interval.
    pub const METRICS_FLUSH: &str = "Application.Metrics.Flush!";
}

/// Payload of a published bus event.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum BusEvent {
    /// A pipeline lifecycle notification carrying the pipeline id.
    Pipeline {
        /// The id of the pipeline the notification is about.
        pipeline: String,
    },
    /// A metrics flush carrying one metric and its current values.
    MetricsFlush {
        /// The name of the flushed metric.
        metric: String,
        /// The tags of the flushed metric.
        tags: BTreeMap<String, String>,
        /// The current values of the flushed metric.
        values: BTreeMap<String, f64>,
    },
    /// A bare signal without payload (trigger relays, custom topics).
    Signal,
}

impl BusEvent {
    /// Creates a pipeline lifecycle event for the given pipeline id.
    pub fn pipeline(pipeline: &str) -> Self {
        BusEvent::Pipeline {
            pipeline: pipeline.to_string(),
        }
    }
}

type Subscriber = Arc<dyn Fn(&str, &BusEvent) + Send + Sync>;

/// A topic to subscriber table delivering events synchronously.
///
/// Cloning a `Bus` is cheap and every clone shares the same subscriber
/// table.
#[derive(Clone, Default)]
pub struct Bus {
    subscribers: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
}

impl Bus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Default::default()
    }

    /// Subscribes a callback to a topic. The callback runs synchronously
    /// in the publisher's task and receives the topic and the event.
    pub fn subscribe<F>(&self, topic: &str, callback: F)
    where
        F: Fn(&str, &BusEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .expect("bus subscriber table lock failed")
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Publishes an event to every subscriber of the topic, in
    /// registration order.
    pub fn publish(&self, topic: &str, event: BusEvent) {
        // Subscribers are cloned out of the table before the callbacks run,
        // so a callback may publish again without deadlocking.
        let subscribers: Vec<Subscriber> = {
            let table = self
                .subscribers
                .lock()
                .expect("bus subscriber table lock failed");
            match table.get(topic) {
                Some(subscribers) => subscribers.clone(),
                None => return,
            }
        };

        tracing::trace!(%topic, subscriber_count = subscribers.len(), "publishing bus event");
        for subscriber in subscribers {
            subscriber(topic, &event);
        }
    }

    /// Returns the number of subscribers currently registered for a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .expect("bus subscriber table lock failed")
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::*;

    #[test]
    fn test_synchronous_delivery_in_order() {
        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe("go!", move |_topic, _event| {
                seen.lock().unwrap().push(tag);
            });
        }

        bus.publish("go!", BusEvent::Signal);
        // Delivery completed before publish returned.
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_publish_from_subscriber() {
        let bus = Bus::new();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let bus_clone = bus.clone();
            bus.subscribe("outer", move |_topic, _event| {
                bus_clone.publish("inner", BusEvent::Signal);
            });
        }
        {
            let count = count.clone();
            bus.subscribe("inner", move |_topic, _event| {
                let _ = count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish("outer", BusEvent::Signal);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_without_subscriber_is_noop() {
        let bus = Bus::new();
        bus.publish("nobody-listens", BusEvent::pipeline("p"));
        assert_eq!(bus.subscriber_count("nobody-listens"), 0);
    }
}
