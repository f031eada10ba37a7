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

//! Definition of the `Lookup` trait.
//!
//! A lookup is a semantic key-to-value mapping consulted by processors at
//! runtime. It is owned by the service registry and loaded asynchronously:
//! every registered lookup completes its initial `load()` before any
//! pipeline starts, and may additionally be reloaded on a fixed interval.
//!
//! Key-based reads are synchronous; connector lookups put a
//! [`LookupCache`] in front of their fetch path to keep the hit rate
//! observable through the `hit`/`miss` counters.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex, RwLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::Registry;

/// Metric name under which every lookup reports its cache counters,
/// tagged `lookup=<id>`.
pub const METRIC_LOOKUP: &str = "bspump.lookup";

/// Value of `len()` before the first successful load.
pub const LEN_NOT_LOADED: i64 = -1;

/// List of errors that can occur with a `Lookup`.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The lookup failed to load its data.
    #[error("lookup load error (lookup: {lookup}, reason: {error})")]
    Load {
        /// The id of the lookup.
        lookup: String,
        /// The error message.
        error: String,
    },
}

/// The lookup trait.
///
/// `len` returns [`LEN_NOT_LOADED`] until the first successful `load()`.
/// `keys` is an ordered snapshot of the current key set; the ordering
/// need not be stable across reloads.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Returns the id under which the lookup is registered.
    fn id(&self) -> &str;

    /// Loads (or reloads) the lookup data. May perform I/O through the
    /// lookup's connection.
    async fn load(&self) -> Result<(), Error>;

    /// Returns the current element count, or [`LEN_NOT_LOADED`].
    fn len(&self) -> i64;

    /// Returns true when the lookup holds no element or is not loaded.
    fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// Returns an ordered snapshot of the keys.
    fn keys(&self) -> Vec<String>;

    /// Returns the reload interval, or `None` for load-once lookups.
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }
}

/// An in-memory cache with hit/miss counters, put by connector lookups in
/// front of their fetch path.
///
/// Missing keys are cached too: a fetch that returned nothing is not
/// repeated until the cache is cleared.
pub struct LookupCache<V> {
    entries: Mutex<HashMap<String, Option<V>>>,
    counter: std::sync::Arc<metrics::Counter>,
}

impl<V: Clone> LookupCache<V> {
    /// Creates a cache reporting its counters under the given lookup id.
    pub fn new(registry: &Registry, lookup_id: &str) -> Self {
        let tags: metrics::Tags =
            std::iter::once(("lookup".to_string(), lookup_id.to_string())).collect();
        Self {
            entries: Mutex::new(HashMap::new()),
            counter: registry.create_counter(METRIC_LOOKUP, tags, &["hit", "miss"]),
        }
    }

    /// Returns the cached value for `key`, or runs `fetch`, caches its
    /// result and returns it. `None` is the absent marker.
    pub fn get_or_fetch(&self, key: &str, fetch: impl FnOnce() -> Option<V>) -> Option<V> {
        let mut entries = self.entries.lock().expect("lookup cache lock failed");
        match entries.get(key) {
            Some(value) => {
                self.counter.add("hit", 1);
                value.clone()
            }
            None => {
                self.counter.add("miss", 1);
                let value = fetch();
                let _ = entries.insert(key.to_string(), value.clone());
                value
            }
        }
    }

    /// Inserts a value, typically during `load()`.
    pub fn insert(&self, key: &str, value: Option<V>) {
        let _ = self
            .entries
            .lock()
            .expect("lookup cache lock failed")
            .insert(key.to_string(), value);
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.lock().expect("lookup cache lock failed").clear();
    }

    /// Returns the number of cached entries (absent markers included).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lookup cache lock failed").len()
    }

    /// Returns true when the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory dictionary lookup seeded at construction.
///
/// `load()` only publishes the element count; `keys()` is sorted by the
/// underlying map order.
pub struct StaticLookup<V> {
    id: String,
    entries: RwLock<BTreeMap<String, V>>,
    count: AtomicI64,
    counter: std::sync::Arc<metrics::Counter>,
}

impl<V: Clone + Send + Sync> StaticLookup<V> {
    /// Creates a static lookup from a seeded map.
    pub fn new(registry: &Registry, lookup_id: &str, entries: BTreeMap<String, V>) -> Self {
        let tags: metrics::Tags =
            std::iter::once(("lookup".to_string(), lookup_id.to_string())).collect();
        Self {
            id: lookup_id.to_string(),
            entries: RwLock::new(entries),
            count: AtomicI64::new(LEN_NOT_LOADED),
            counter: registry.create_counter(METRIC_LOOKUP, tags, &["hit", "miss"]),
        }
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self
            .entries
            .read()
            .expect("static lookup entries lock failed")
            .get(key)
            .cloned();
        match value {
            Some(_) => self.counter.add("hit", 1),
            None => self.counter.add("miss", 1),
        }
        value
    }

    /// Replaces the whole entry set; the count is published by the next
    /// `load()`.
    pub fn replace(&self, entries: BTreeMap<String, V>) {
        *self
            .entries
            .write()
            .expect("static lookup entries lock failed") = entries;
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> Lookup for StaticLookup<V> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load(&self) -> Result<(), Error> {
        let count = self
            .entries
            .read()
            .expect("static lookup entries lock failed")
            .len() as i64;
        self.count.store(count, Ordering::Relaxed);
        tracing::debug!(lookup = %self.id, %count, "static lookup loaded");
        Ok(())
    }

    fn len(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("static lookup entries lock failed")
            .keys()
            .cloned()
            .collect()
    }
}
