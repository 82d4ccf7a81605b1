//! Device-test harness.
//!
//! `DeviceTest` wraps a test body in a counter checkpoint window: it
//! registers the native backend, fixes the host and device RNG seeds, and
//! captures a start snapshot at construction. Assertions lazily capture the
//! end snapshot and diff the two; `reset_checkpoint` chains disjoint
//! windows within one test. On drop, the full difference report is logged
//! when `TENSORLINK_TEST_DUMP_METRICS` is set.

use std::collections::HashSet;
use std::sync::{Arc, Once};
use std::thread;

use once_cell::sync::Lazy;

use crate::backend::{self, MatmulPrecision};
use crate::error::log_backend_error;
use crate::metrics::{ChangedCounter, CounterSource, GlobalCounters, MetricsSnapshot};
use crate::rng;

/// Seed applied to the host RNG and every device RNG at test start.
pub const TEST_SEED: u64 = 42;

/// End-of-test diagnostic dump flag, read once. Malformed values disable.
static DUMP_METRICS: Lazy<bool> = Lazy::new(|| {
    std::env::var("TENSORLINK_TEST_DUMP_METRICS")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
});

static COMMON_SETUP: Once = Once::new();

/// Suite-level setup, guaranteed to run exactly once per process.
///
/// `DeviceTest::start` invokes this before any per-test work, so the
/// precision policy is in place before the first fixture exists.
pub fn common_setup() {
    COMMON_SETUP.call_once(|| {
        backend::set_matmul_precision(MatmulPrecision::Highest);
        log::info!("[Harness] Common setup complete (matmul precision: Highest)");
    });
}

/// Per-test fixture orchestrating before/after counter snapshots.
pub struct DeviceTest {
    test_name: String,
    source: Arc<dyn CounterSource>,
    start: MetricsSnapshot,
    end: Option<MetricsSnapshot>,
}

impl DeviceTest {
    /// Start a test against the global registry and the native backend.
    ///
    /// Registers the backend (idempotent), seeds the host RNG and every
    /// backend device RNG with [`TEST_SEED`], and captures the start
    /// snapshot. Panics on registration failure: a fixture that cannot set
    /// up its backend is a failed test.
    pub fn start() -> Self {
        common_setup();

        if let Err(err) = backend::register_native_backend() {
            log_backend_error(&err, "DeviceTest::start");
            panic!("failed to register native backend: {}", err);
        }

        rng::seed_host_rng(TEST_SEED);
        match backend::backend() {
            Ok(backend) => {
                for device in backend.devices() {
                    if let Err(err) = backend.seed_rng(device, TEST_SEED) {
                        log_backend_error(&err, "DeviceTest::start");
                        panic!("failed to seed rng for {}: {}", device, err);
                    }
                }
            }
            Err(err) => {
                log_backend_error(&err, "DeviceTest::start");
                panic!("no backend available after registration: {}", err);
            }
        }

        Self::with_source(Arc::new(GlobalCounters))
    }

    /// Start a test against an injected counter source.
    ///
    /// Runs the suite setup and captures the start snapshot from `source`;
    /// backend registration and RNG seeding are the global-registry
    /// constructor's job. Intended for deterministic tests over a fake
    /// registry.
    pub fn with_source(source: Arc<dyn CounterSource>) -> Self {
        common_setup();

        let test_name = thread::current()
            .name()
            .unwrap_or("unnamed-test")
            .to_string();
        let start = MetricsSnapshot::from_source(source.as_ref());
        log::debug!("[Harness] {}: start snapshot captured", test_name);

        Self {
            test_name,
            source,
            start,
            end: None,
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Capture the end snapshot if absent. Idempotent.
    pub fn ensure_end_snapshot(&mut self) {
        self.end
            .get_or_insert_with(|| MetricsSnapshot::from_source(self.source.as_ref()));
    }

    /// Assert that no counter matching `pattern` changed in this window.
    ///
    /// Logs each offending counter and panics with the full list when any
    /// matched counter changed.
    pub fn expect_counter_not_changed(&mut self, pattern: &str, ignore: Option<&HashSet<String>>) {
        let changed = self.changed_counters(pattern, ignore);
        for change in &changed {
            log::info!(
                "[Harness] {}: counter '{}' changed: {} -> {}",
                self.test_name,
                change.name,
                change.before,
                change.after_label()
            );
        }
        if !changed.is_empty() {
            let listing = changed
                .iter()
                .map(|c| format!("{}: {} -> {}", c.name, c.before, c.after_label()))
                .collect::<Vec<_>>()
                .join(", ");
            panic!(
                "expected no counter matching '{}' to change, but {} did: {}",
                pattern,
                changed.len(),
                listing
            );
        }
    }

    /// Assert that at least one counter matching `pattern` changed.
    pub fn expect_counter_changed(&mut self, pattern: &str, ignore: Option<&HashSet<String>>) {
        let changed = self.changed_counters(pattern, ignore);
        if changed.is_empty() {
            panic!(
                "expected at least one counter matching '{}' to change, but none did",
                pattern
            );
        }
    }

    /// End the current checkpoint window.
    ///
    /// The end snapshot (captured now if absent) becomes the new start, so
    /// consecutive windows chain without re-reading the registry twice or
    /// re-registering the backend.
    pub fn reset_checkpoint(&mut self) {
        self.ensure_end_snapshot();
        if let Some(end) = self.end.take() {
            self.start = end;
        }
        log::debug!("[Harness] {}: checkpoint reset", self.test_name);
    }

    fn changed_counters(
        &mut self,
        pattern: &str,
        ignore: Option<&HashSet<String>>,
    ) -> Vec<ChangedCounter> {
        let end = self
            .end
            .get_or_insert_with(|| MetricsSnapshot::from_source(self.source.as_ref()));
        match self.start.counter_changed(pattern, end, ignore) {
            Ok(changed) => changed,
            Err(err) => panic!("invalid counter pattern in assertion: {}", err),
        }
    }
}

impl Drop for DeviceTest {
    fn drop(&mut self) {
        if !*DUMP_METRICS {
            return;
        }
        let end = self
            .end
            .get_or_insert_with(|| MetricsSnapshot::from_source(self.source.as_ref()));
        let report = self.start.dump_differences(end, None);
        if !report.is_empty() {
            log::info!(
                "[Harness] {} metrics differences:\n{}",
                self.test_name,
                report
            );
        }
    }
}
