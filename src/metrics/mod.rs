//! Process-wide counter registry.
//!
//! Counters are named monotonic cells updated by the runtime on its hot
//! paths. Instrumentation sites hold `Arc<Counter>` handles so increments
//! are a single atomic add with no registry lookup. Enumeration goes
//! through the `CounterSource` seam so snapshot consumers can be tested
//! against a fake registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

pub mod snapshot;

pub use snapshot::{ChangedCounter, MetricsSnapshot};

/// Global counter registry shared across the crate.
static REGISTRY: Lazy<MetricsRegistry> = Lazy::new(MetricsRegistry::default);

/// Access the global counter registry.
pub fn registry() -> &'static MetricsRegistry {
    &REGISTRY
}

/// Get or create a counter in the global registry.
pub fn counter(name: &str) -> Arc<Counter> {
    registry().counter(name)
}

/// Human-readable listing of every counter in the global registry.
pub fn counters_report() -> String {
    registry().counters_report()
}

/// A named monotonic counter cell.
pub struct Counter {
    name: String,
    value: AtomicU64,
}

impl Counter {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Read-only enumeration seam over a counter store.
///
/// The registry implements this for production use; snapshot and harness
/// tests implement it over fixed maps. Each counter load is atomic; the map
/// as a whole is the point-in-time view the diff engine operates on.
pub trait CounterSource: Send + Sync {
    /// Enumerate all counters as name → value pairs. Never mutates.
    fn counter_entries(&self) -> BTreeMap<String, u64>;
}

/// Process-wide name → counter map.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

impl MetricsRegistry {
    /// Get or create the counter with the given name.
    ///
    /// The same name always resolves to the same underlying cell.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        {
            let counters = self.counters.read().expect("counter registry poisoned");
            if let Some(counter) = counters.get(name) {
                return Arc::clone(counter);
            }
        }

        let mut counters = self.counters.write().expect("counter registry poisoned");
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::new(name))),
        )
    }

    /// One `name: value` line per counter, in name order.
    pub fn counters_report(&self) -> String {
        let mut report = String::new();
        for (name, value) in self.counter_entries() {
            let _ = writeln!(report, "{}: {}", name, value);
        }
        report
    }
}

impl CounterSource for MetricsRegistry {
    fn counter_entries(&self) -> BTreeMap<String, u64> {
        let counters = self.counters.read().expect("counter registry poisoned");
        counters
            .iter()
            .map(|(name, counter)| (name.clone(), counter.value()))
            .collect()
    }
}

/// Zero-sized view of the global registry through the `CounterSource` seam.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalCounters;

impl CounterSource for GlobalCounters {
    fn counter_entries(&self) -> BTreeMap<String, u64> {
        registry().counter_entries()
    }
}
