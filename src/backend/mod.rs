//! Backend abstractions: the execution seam, process-wide registration,
//! and the global matmul precision policy.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use once_cell::sync::Lazy;

use crate::config::RuntimeConfig;
use crate::device::Device;
use crate::error::BackendError;
use crate::program::{Executable, Program};

mod native;
pub use native::NativeBackend;

/// A buffer resident on a backend device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTensor {
    pub device: Device,
    pub data: Vec<f32>,
}

/// Handle to an execution running on a scheduler worker thread.
pub struct ScheduledExecution {
    handle: JoinHandle<Result<Vec<f32>, BackendError>>,
}

impl ScheduledExecution {
    pub(crate) fn new(handle: JoinHandle<Result<Vec<f32>, BackendError>>) -> Self {
        Self { handle }
    }

    /// Join the worker and return the program output.
    pub fn wait(self) -> Result<Vec<f32>, BackendError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(BackendError::ExecutionFailed {
                reason: "scheduled execution worker panicked".to_string(),
            }),
        }
    }
}

/// Trait implemented by execution backends.
///
/// A backend owns program compilation, execution, buffer transfers, and
/// per-device RNG state. All paths are expected to instrument themselves
/// through the global counter registry.
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Devices this backend exposes.
    fn devices(&self) -> Vec<Device>;

    fn compile(&self, program: &Program) -> Result<Arc<Executable>, BackendError>;

    fn execute(
        &self,
        executable: &Executable,
        inputs: &[Vec<f32>],
        device: Device,
    ) -> Result<Vec<f32>, BackendError>;

    /// Run the program on a worker thread; the returned handle joins it.
    fn schedule(
        self: Arc<Self>,
        executable: Arc<Executable>,
        inputs: Vec<Vec<f32>>,
        device: Device,
    ) -> Result<ScheduledExecution, BackendError>;

    fn transfer_to_device(&self, data: &[f32], device: Device)
        -> Result<DeviceTensor, BackendError>;

    fn transfer_from_device(&self, tensor: &DeviceTensor) -> Result<Vec<f32>, BackendError>;

    /// Reset the RNG of a single device. Independent of the host RNG.
    fn seed_rng(&self, device: Device, seed: u64) -> Result<(), BackendError>;
}

static ACTIVE_BACKEND: Lazy<RwLock<Option<Arc<dyn ExecutionBackend>>>> =
    Lazy::new(|| RwLock::new(None));

/// Register a backend for the whole process.
///
/// Registration is explicitly idempotent: the first registration wins and
/// returns `Ok(true)`; re-registering a backend with the same name is a
/// logged no-op returning `Ok(false)`; attempting to replace an active
/// backend of a different name is an error.
pub fn register_backend(backend: Arc<dyn ExecutionBackend>) -> Result<bool, BackendError> {
    let mut slot = ACTIVE_BACKEND
        .write()
        .map_err(|_| BackendError::LockPoisoned {
            component: "backend registry".to_string(),
        })?;

    match slot.as_ref() {
        None => {
            log::info!("[Backend] Registered execution backend '{}'", backend.name());
            *slot = Some(backend);
            Ok(true)
        }
        Some(active) if active.name() == backend.name() => {
            log::debug!(
                "[Backend] Backend '{}' already registered, ignoring",
                backend.name()
            );
            Ok(false)
        }
        Some(active) => Err(BackendError::AlreadyRegistered {
            active: active.name().to_string(),
            requested: backend.name().to_string(),
        }),
    }
}

/// Register the in-process native backend with config from disk.
pub fn register_native_backend() -> Result<bool, BackendError> {
    {
        let slot = ACTIVE_BACKEND
            .read()
            .map_err(|_| BackendError::LockPoisoned {
                component: "backend registry".to_string(),
            })?;
        if let Some(active) = slot.as_ref() {
            if active.name() == native::BACKEND_NAME {
                return Ok(false);
            }
        }
    }

    let config = RuntimeConfig::load();
    register_backend(Arc::new(NativeBackend::new(config)))
}

/// The active backend, if one is registered.
pub fn backend() -> Result<Arc<dyn ExecutionBackend>, BackendError> {
    let slot = ACTIVE_BACKEND
        .read()
        .map_err(|_| BackendError::LockPoisoned {
            component: "backend registry".to_string(),
        })?;
    slot.as_ref().map(Arc::clone).ok_or(BackendError::NotRegistered)
}

/// Accumulator precision for `Sum` reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MatmulPrecision {
    #[default]
    Default = 0,
    High = 1,
    Highest = 2,
}

static MATMUL_PRECISION: AtomicU8 = AtomicU8::new(MatmulPrecision::Default as u8);

/// Set the global precision policy.
pub fn set_matmul_precision(precision: MatmulPrecision) {
    MATMUL_PRECISION.store(precision as u8, Ordering::SeqCst);
    log::debug!("[Backend] Matmul precision set to {:?}", precision);
}

/// Read the global precision policy.
pub fn matmul_precision() -> MatmulPrecision {
    match MATMUL_PRECISION.load(Ordering::Relaxed) {
        1 => MatmulPrecision::High,
        2 => MatmulPrecision::Highest,
        _ => MatmulPrecision::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_precision_policy_roundtrip() {
        let prior = matmul_precision();

        set_matmul_precision(MatmulPrecision::High);
        assert_eq!(matmul_precision(), MatmulPrecision::High);
        set_matmul_precision(MatmulPrecision::Highest);
        assert_eq!(matmul_precision(), MatmulPrecision::Highest);
        set_matmul_precision(MatmulPrecision::Default);
        assert_eq!(matmul_precision(), MatmulPrecision::Default);

        set_matmul_precision(prior);
    }

    #[test]
    #[serial]
    fn test_native_registration_is_idempotent() {
        // First call in the process registers; later calls are no-ops.
        register_native_backend().unwrap();
        assert_eq!(register_native_backend().unwrap(), false);
        assert_eq!(backend().unwrap().name(), native::BACKEND_NAME);
    }

    #[test]
    #[serial]
    fn test_conflicting_backend_is_rejected() {
        register_native_backend().unwrap();

        struct OtherBackend;
        impl ExecutionBackend for OtherBackend {
            fn name(&self) -> &str {
                "other"
            }
            fn devices(&self) -> Vec<Device> {
                vec![]
            }
            fn compile(&self, program: &Program) -> Result<Arc<Executable>, BackendError> {
                Executable::new(program.clone()).map(Arc::new)
            }
            fn execute(
                &self,
                _executable: &Executable,
                _inputs: &[Vec<f32>],
                _device: Device,
            ) -> Result<Vec<f32>, BackendError> {
                Ok(vec![])
            }
            fn schedule(
                self: Arc<Self>,
                _executable: Arc<Executable>,
                _inputs: Vec<Vec<f32>>,
                _device: Device,
            ) -> Result<ScheduledExecution, BackendError> {
                Err(BackendError::ExecutionFailed {
                    reason: "unsupported".to_string(),
                })
            }
            fn transfer_to_device(
                &self,
                _data: &[f32],
                device: Device,
            ) -> Result<DeviceTensor, BackendError> {
                Err(BackendError::UnknownDevice {
                    device: device.to_string(),
                })
            }
            fn transfer_from_device(
                &self,
                _tensor: &DeviceTensor,
            ) -> Result<Vec<f32>, BackendError> {
                Ok(vec![])
            }
            fn seed_rng(&self, _device: Device, _seed: u64) -> Result<(), BackendError> {
                Ok(())
            }
        }

        let result = register_backend(Arc::new(OtherBackend));
        assert!(matches!(
            result,
            Err(BackendError::AlreadyRegistered { .. })
        ));
    }
}
