//! Host-side seeded random generation.
//!
//! Device-side seeding is a separate entry point on the backend
//! (`ExecutionBackend::seed_rng`); this module owns the host generator used
//! for workload inputs. Both are reseeded with the fixed test seed by the
//! harness.

use once_cell::sync::Lazy;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Mutex;

static HOST_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::seed_from_u64(0)));

/// Reseed the host generator.
pub fn seed_host_rng(seed: u64) {
    let mut rng = HOST_RNG.lock().expect("host rng poisoned");
    *rng = StdRng::seed_from_u64(seed);
}

/// Run a closure against the host generator.
pub fn with_host_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut rng = HOST_RNG.lock().expect("host rng poisoned");
    f(&mut rng)
}

/// Generate a workload input buffer of `len` samples in [-1, 1).
pub fn random_host_buffer(len: usize) -> Vec<f32> {
    with_host_rng(|rng| (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect())
}
