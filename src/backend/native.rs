//! In-process reference backend.
//!
//! Compiles programs into a FIFO-bounded cache, runs the element-wise op
//! pipeline inline or on scheduler worker threads, and moves buffers to and
//! from virtual CPU devices. Every path bumps a registry counter; those
//! counters are what the device-test harness observes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::backend::{
    matmul_precision, DeviceTensor, ExecutionBackend, MatmulPrecision, ScheduledExecution,
};
use crate::config::RuntimeConfig;
use crate::device::Device;
use crate::error::BackendError;
use crate::metrics::{self, Counter};
use crate::program::{Executable, OpKind, Program};

pub(crate) const BACKEND_NAME: &str = "native";

/// Seed used for a device RNG that was never explicitly seeded.
const DEFAULT_DEVICE_SEED: u64 = 0;

/// Registry counter handles for the backend hot paths.
struct BackendCounters {
    cached_compile: Arc<Counter>,
    uncached_compile: Arc<Counter>,
    execute_program: Arc<Counter>,
    schedule_execute: Arc<Counter>,
    transfer_to_device: Arc<Counter>,
    transfer_from_device: Arc<Counter>,
    seed_device_rng: Arc<Counter>,
}

impl BackendCounters {
    fn new() -> Self {
        Self {
            cached_compile: metrics::counter("CachedCompile"),
            uncached_compile: metrics::counter("UncachedCompile"),
            execute_program: metrics::counter("ExecuteProgram"),
            schedule_execute: metrics::counter("ScheduleExecute"),
            transfer_to_device: metrics::counter("TransferToDevice"),
            transfer_from_device: metrics::counter("TransferFromDevice"),
            seed_device_rng: metrics::counter("SeedDeviceRng"),
        }
    }
}

/// FIFO-bounded fingerprint → executable cache.
struct CompileCache {
    capacity: usize,
    order: VecDeque<u64>,
    entries: HashMap<u64, Arc<Executable>>,
}

impl CompileCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, fingerprint: u64) -> Option<Arc<Executable>> {
        self.entries.get(&fingerprint).map(Arc::clone)
    }

    fn insert(&mut self, fingerprint: u64, executable: Arc<Executable>) {
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(fingerprint);
        self.entries.insert(fingerprint, executable);
    }
}

/// The in-process execution backend.
pub struct NativeBackend {
    device_count: usize,
    log_every_n_executions: u64,
    cache: Mutex<CompileCache>,
    device_rngs: Mutex<HashMap<usize, StdRng>>,
    execution_count: AtomicU64,
    counters: BackendCounters,
}

impl NativeBackend {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            device_count: config.execution.device_count.max(1),
            log_every_n_executions: config.execution.log_every_n_executions,
            cache: Mutex::new(CompileCache::new(config.compile.cache_capacity)),
            device_rngs: Mutex::new(HashMap::new()),
            execution_count: AtomicU64::new(0),
            counters: BackendCounters::new(),
        }
    }

    fn check_device(&self, device: Device) -> Result<(), BackendError> {
        if device.ordinal >= self.device_count {
            return Err(BackendError::UnknownDevice {
                device: device.to_string(),
            });
        }
        Ok(())
    }

    fn run_pipeline(
        &self,
        executable: &Executable,
        inputs: &[Vec<f32>],
        device: Device,
    ) -> Result<Vec<f32>, BackendError> {
        let program = executable.program();
        let mut remaining = inputs.iter().skip(1);
        let mut acc = inputs[0].clone();

        for op in &program.ops {
            match op {
                OpKind::Add | OpKind::Mul => {
                    let rhs = remaining.next().ok_or_else(|| {
                        BackendError::InputArityMismatch {
                            program: program.name.clone(),
                            expected: program.input_arity(),
                            actual: inputs.len(),
                        }
                    })?;
                    if rhs.len() != acc.len() {
                        return Err(BackendError::ShapeMismatch {
                            program: program.name.clone(),
                            expected: acc.len(),
                            actual: rhs.len(),
                        });
                    }
                    match op {
                        OpKind::Add => {
                            for (lhs, rhs) in acc.iter_mut().zip(rhs) {
                                *lhs += rhs;
                            }
                        }
                        _ => {
                            for (lhs, rhs) in acc.iter_mut().zip(rhs) {
                                *lhs *= rhs;
                            }
                        }
                    }
                }
                OpKind::Scale(c) => {
                    for value in &mut acc {
                        *value *= c;
                    }
                }
                OpKind::Randomize => {
                    let mut rngs =
                        self.device_rngs
                            .lock()
                            .map_err(|_| BackendError::LockPoisoned {
                                component: "device rngs".to_string(),
                            })?;
                    let rng = rngs
                        .entry(device.ordinal)
                        .or_insert_with(|| StdRng::seed_from_u64(DEFAULT_DEVICE_SEED));
                    for value in &mut acc {
                        *value += rng.gen_range(-0.5..0.5);
                    }
                }
                OpKind::Sum => {
                    acc = vec![reduce_sum(&acc)];
                }
            }
        }

        Ok(acc)
    }
}

impl ExecutionBackend for NativeBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn devices(&self) -> Vec<Device> {
        (0..self.device_count).map(Device::cpu).collect()
    }

    fn compile(&self, program: &Program) -> Result<Arc<Executable>, BackendError> {
        program.validate()?;
        let fingerprint = program.fingerprint();

        let mut cache = self.cache.lock().map_err(|_| BackendError::LockPoisoned {
            component: "compile cache".to_string(),
        })?;

        if let Some(executable) = cache.get(fingerprint) {
            self.counters.cached_compile.increment();
            tracing::trace!(
                program = %program.name,
                fingerprint,
                "compile cache hit"
            );
            return Ok(executable);
        }

        let executable = Arc::new(Executable::new(program.clone())?);
        cache.insert(fingerprint, Arc::clone(&executable));
        self.counters.uncached_compile.increment();
        tracing::debug!(
            program = %program.name,
            fingerprint,
            ops = program.ops.len(),
            "compiled program"
        );
        Ok(executable)
    }

    fn execute(
        &self,
        executable: &Executable,
        inputs: &[Vec<f32>],
        device: Device,
    ) -> Result<Vec<f32>, BackendError> {
        self.check_device(device)?;

        let program = executable.program();
        let expected = program.input_arity();
        if inputs.len() != expected {
            return Err(BackendError::InputArityMismatch {
                program: program.name.clone(),
                expected,
                actual: inputs.len(),
            });
        }

        tracing::trace!(
            program = %program.name,
            device = %device,
            elements = inputs[0].len(),
            "executing program"
        );

        let output = self.run_pipeline(executable, inputs, device)?;
        self.counters.execute_program.increment();

        let executed = self.execution_count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.log_every_n_executions > 0 && executed % self.log_every_n_executions == 0 {
            log::debug!("[Backend] Executed {} programs", executed);
        }

        Ok(output)
    }

    fn schedule(
        self: Arc<Self>,
        executable: Arc<Executable>,
        inputs: Vec<Vec<f32>>,
        device: Device,
    ) -> Result<ScheduledExecution, BackendError> {
        self.check_device(device)?;

        let handle = thread::Builder::new()
            .name("tlk-schedule".to_string())
            .spawn(move || {
                let result = self.execute(&executable, &inputs, device);
                // Bumped from the worker: counters legitimately move between
                // snapshots while a scheduled execution is in flight.
                self.counters.schedule_execute.increment();
                result
            })
            .map_err(|err| BackendError::ExecutionFailed {
                reason: format!("failed to spawn scheduler worker: {}", err),
            })?;

        Ok(ScheduledExecution::new(handle))
    }

    fn transfer_to_device(
        &self,
        data: &[f32],
        device: Device,
    ) -> Result<DeviceTensor, BackendError> {
        self.check_device(device)?;
        self.counters.transfer_to_device.increment();
        Ok(DeviceTensor {
            device,
            data: data.to_vec(),
        })
    }

    fn transfer_from_device(&self, tensor: &DeviceTensor) -> Result<Vec<f32>, BackendError> {
        self.check_device(tensor.device)?;
        self.counters.transfer_from_device.increment();
        Ok(tensor.data.clone())
    }

    fn seed_rng(&self, device: Device, seed: u64) -> Result<(), BackendError> {
        self.check_device(device)?;
        let mut rngs = self
            .device_rngs
            .lock()
            .map_err(|_| BackendError::LockPoisoned {
                component: "device rngs".to_string(),
            })?;
        rngs.insert(device.ordinal, StdRng::seed_from_u64(seed));
        self.counters.seed_device_rng.increment();
        Ok(())
    }
}

/// Reduce a buffer to its sum under the global precision policy.
fn reduce_sum(values: &[f32]) -> f32 {
    match matmul_precision() {
        MatmulPrecision::Default => values.iter().sum(),
        MatmulPrecision::High => values.iter().map(|&v| v as f64).sum::<f64>() as f32,
        MatmulPrecision::Highest => {
            // Kahan compensation over f64.
            let mut sum = 0.0_f64;
            let mut compensation = 0.0_f64;
            for &value in values {
                let y = value as f64 - compensation;
                let t = sum + y;
                compensation = (t - sum) - y;
                sum = t;
            }
            sum as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::set_matmul_precision;
    use serial_test::serial;

    fn test_backend() -> NativeBackend {
        let mut config = RuntimeConfig::default();
        config.execution.device_count = 2;
        NativeBackend::new(config)
    }

    #[test]
    fn test_compile_cache_returns_same_executable() {
        let backend = test_backend();
        let program = Program::new("cached", vec![OpKind::Scale(1.25), OpKind::Sum]);

        let first = backend.compile(&program).unwrap();
        let second = backend.compile(&program).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_compile_cache_fifo_eviction() {
        let mut config = RuntimeConfig::default();
        config.compile.cache_capacity = 2;
        let backend = NativeBackend::new(config);

        let a = Program::new("a", vec![OpKind::Scale(1.0)]);
        let b = Program::new("b", vec![OpKind::Scale(2.0)]);
        let c = Program::new("c", vec![OpKind::Scale(3.0)]);

        let first_a = backend.compile(&a).unwrap();
        backend.compile(&b).unwrap();
        backend.compile(&c).unwrap();

        // `a` was evicted, so recompiling builds a fresh executable.
        let second_a = backend.compile(&a).unwrap();
        assert!(!Arc::ptr_eq(&first_a, &second_a));
    }

    #[test]
    fn test_execute_elementwise_pipeline() {
        let backend = test_backend();
        let program = Program::new("axpy", vec![OpKind::Scale(2.0), OpKind::Add]);
        let executable = backend.compile(&program).unwrap();

        let output = backend
            .execute(
                &executable,
                &[vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]],
                Device::cpu(0),
            )
            .unwrap();
        assert_eq!(output, vec![12.0, 24.0, 36.0]);
    }

    #[test]
    fn test_execute_rejects_unknown_device() {
        let backend = test_backend();
        let program = Program::new("p", vec![OpKind::Sum]);
        let executable = backend.compile(&program).unwrap();

        let result = backend.execute(&executable, &[vec![1.0]], Device::cpu(9));
        assert!(matches!(result, Err(BackendError::UnknownDevice { .. })));
    }

    #[test]
    fn test_execute_rejects_arity_mismatch() {
        let backend = test_backend();
        let program = Program::new("binary", vec![OpKind::Add]);
        let executable = backend.compile(&program).unwrap();

        let result = backend.execute(&executable, &[vec![1.0]], Device::cpu(0));
        assert!(matches!(
            result,
            Err(BackendError::InputArityMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_execute_rejects_shape_mismatch() {
        let backend = test_backend();
        let program = Program::new("binary", vec![OpKind::Add]);
        let executable = backend.compile(&program).unwrap();

        let result = backend.execute(
            &executable,
            &[vec![1.0, 2.0], vec![1.0, 2.0, 3.0]],
            Device::cpu(0),
        );
        assert!(matches!(
            result,
            Err(BackendError::ShapeMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_randomize_is_deterministic_per_seed() {
        let backend = test_backend();
        let program = Program::new("noise", vec![OpKind::Randomize]);
        let executable = backend.compile(&program).unwrap();
        let device = Device::cpu(1);

        backend.seed_rng(device, 7).unwrap();
        let first = backend
            .execute(&executable, &[vec![0.0; 8]], device)
            .unwrap();

        backend.seed_rng(device, 7).unwrap();
        let second = backend
            .execute(&executable, &[vec![0.0; 8]], device)
            .unwrap();
        assert_eq!(first, second);

        backend.seed_rng(device, 8).unwrap();
        let third = backend
            .execute(&executable, &[vec![0.0; 8]], device)
            .unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_device_rngs_are_independent() {
        let backend = test_backend();
        let program = Program::new("noise", vec![OpKind::Randomize]);
        let executable = backend.compile(&program).unwrap();

        backend.seed_rng(Device::cpu(0), 7).unwrap();
        backend.seed_rng(Device::cpu(1), 7).unwrap();

        // Draining device 0 must not advance device 1.
        backend
            .execute(&executable, &[vec![0.0; 8]], Device::cpu(0))
            .unwrap();
        let on_one = backend
            .execute(&executable, &[vec![0.0; 8]], Device::cpu(1))
            .unwrap();

        backend.seed_rng(Device::cpu(1), 7).unwrap();
        let on_one_again = backend
            .execute(&executable, &[vec![0.0; 8]], Device::cpu(1))
            .unwrap();
        assert_eq!(on_one, on_one_again);
    }

    #[test]
    #[serial]
    fn test_sum_precision_policy() {
        let backend = test_backend();
        let program = Program::new("sum", vec![OpKind::Sum]);
        let executable = backend.compile(&program).unwrap();
        let inputs = [vec![1.0e8_f32, 1.0, -1.0e8]];
        let prior = matmul_precision();

        // f32 accumulation loses the 1.0 next to 1e8.
        set_matmul_precision(MatmulPrecision::Default);
        let naive = backend.execute(&executable, &inputs, Device::cpu(0)).unwrap();
        assert_eq!(naive, vec![0.0]);

        set_matmul_precision(MatmulPrecision::High);
        let high = backend.execute(&executable, &inputs, Device::cpu(0)).unwrap();
        assert_eq!(high, vec![1.0]);

        set_matmul_precision(MatmulPrecision::Highest);
        let highest = backend.execute(&executable, &inputs, Device::cpu(0)).unwrap();
        assert_eq!(highest, vec![1.0]);

        set_matmul_precision(prior);
    }

    #[test]
    fn test_transfers_roundtrip() {
        let backend = test_backend();
        let data = vec![1.0, 2.0, 3.0];

        let tensor = backend.transfer_to_device(&data, Device::cpu(0)).unwrap();
        assert_eq!(tensor.device, Device::cpu(0));

        let back = backend.transfer_from_device(&tensor).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_scheduled_execution_returns_output() {
        let backend = Arc::new(test_backend());
        let program = Program::new("scheduled", vec![OpKind::Scale(3.0)]);
        let executable = backend.compile(&program).unwrap();

        let pending = Arc::clone(&backend)
            .schedule(executable, vec![vec![1.0, 2.0]], Device::cpu(0))
            .unwrap();
        assert_eq!(pending.wait().unwrap(), vec![3.0, 6.0]);
    }

    #[test]
    fn test_devices_enumeration() {
        let backend = test_backend();
        assert_eq!(backend.devices(), vec![Device::cpu(0), Device::cpu(1)]);
    }
}
