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

//! Definition of the `Trigger` trait and the built-in triggers.
//!
//! A trigger is a named signal source: every firing asks each subscribed
//! trigger-driven source to execute exactly one cycle. A firing carries
//! no payload beyond "run once", so subscriptions are plain `()` channels
//! that the source drains at its own pace. Firings arriving while a
//! cycle still runs queue up instead of overlapping.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bus::{Bus, BusEvent};
use task::{labels::TaskLabels, TaskManager};

/// The trigger trait.
pub trait Trigger: Send + Sync {
    /// Returns the name of the trigger.
    fn id(&self) -> &str;

    /// Attaches a firing channel. Every subsequent firing sends one `()`
    /// on the channel; channels whose receiver is gone are detached.
    fn subscribe(&self, firings: flume::Sender<()>);
}

type Subscribers = Arc<Mutex<Vec<flume::Sender<()>>>>;

fn fire_all(trigger_id: &str, subscribers: &Subscribers) {
    let mut subscribers = subscribers.lock().expect("trigger subscribers lock failed");
    subscribers.retain(|firings| firings.send(()).is_ok());
    tracing::trace!(trigger = %trigger_id, subscriber_count = subscribers.len(), "trigger fired");
}

/// A trigger firing on a fixed wall-clock interval.
///
/// The ticker task starts with [`PeriodicTrigger::start`] and runs until
/// the task manager shuts it down.
pub struct PeriodicTrigger {
    id: String,
    every: Duration,
    subscribers: Subscribers,
}

impl PeriodicTrigger {
    /// Creates a periodic trigger firing every `every`.
    pub fn new(id: &str, every: Duration) -> Self {
        Self {
            id: id.to_string(),
            every,
            subscribers: Default::default(),
        }
    }

    /// Spawns the ticker task and registers it with the task manager.
    pub fn start(&self, tasks: &TaskManager) {
        let trigger_id = self.id.clone();
        let every = self.every;
        let subscribers = self.subscribers.clone();

        let join_handle = tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick of a tokio interval completes immediately and
            // would fire one cycle before the interval elapsed once.
            let _ = interval.tick().await;
            loop {
                let _ = interval.tick().await;
                fire_all(&trigger_id, &subscribers);
            }
        });
        tasks.register(join_handle, &TaskLabels::new("trigger", &self.id));
    }
}

impl Trigger for PeriodicTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self, firings: flume::Sender<()>) {
        self.subscribers
            .lock()
            .expect("trigger subscribers lock failed")
            .push(firings);
    }
}

/// A trigger relaying a pub/sub topic: every event published on the
/// topic becomes one firing.
pub struct PubSubTrigger {
    id: String,
    subscribers: Subscribers,
}

impl PubSubTrigger {
    /// Creates a pub/sub trigger bound to a topic of the given bus.
    pub fn new(bus: &Bus, id: &str, topic: &str) -> Self {
        let subscribers: Subscribers = Default::default();
        let trigger_id = id.to_string();
        let relayed = subscribers.clone();
        bus.subscribe(topic, move |_topic, _event: &BusEvent| {
            fire_all(&trigger_id, &relayed);
        });
        Self {
            id: id.to_string(),
            subscribers,
        }
    }
}

impl Trigger for PubSubTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self, firings: flume::Sender<()>) {
        self.subscribers
            .lock()
            .expect("trigger subscribers lock failed")
            .push(firings);
    }
}
