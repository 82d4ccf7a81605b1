// tensorlink - runtime side of a tensor-program bridge
// In-process execution backend with counter instrumentation, metrics
// snapshot diffing, and a device-test harness.

// Module declarations
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod program;
pub mod rng;

// Re-exports for convenience
pub use device::{default_device, Device, DeviceKind};
pub use harness::DeviceTest;
pub use metrics::{ChangedCounter, MetricsSnapshot};

/// Initialize logging for binaries and tests.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().format_timestamp_millis().try_init();
}
