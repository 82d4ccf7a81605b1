//! Integration tests for the device-test harness over the real backend.
//!
//! These tests validate the full fixture lifecycle against the process-wide
//! counter registry, including:
//! - Backend registration and RNG seeding at test start
//! - Counter-change assertions over real compile/execute/transfer paths
//! - Compile-cache observation through counter windows
//! - Scheduled executions bumping counters from worker threads
//!
//! Everything here touches global state (registry, backend, precision
//! policy), so tests run serialized.

use std::collections::HashSet;
use std::sync::Arc;

use serial_test::serial;

use tensorlink::backend::{self, ExecutionBackend};
use tensorlink::device::default_device;
use tensorlink::harness::DeviceTest;
use tensorlink::program::{OpKind, Program};
use tensorlink::rng;

fn ignore(names: &[&str]) -> HashSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Compile + execute a program and assert the execution counters moved.
#[test]
#[serial]
fn execute_bumps_execute_program_counter() {
    let mut fixture = DeviceTest::start();
    let backend = backend::backend().expect("backend registered by fixture");

    let program = Program::new(
        "itest-execute",
        vec![OpKind::Scale(1.0625), OpKind::Add, OpKind::Sum],
    );
    let executable = backend.compile(&program).expect("compile");
    let inputs = vec![rng::random_host_buffer(64), rng::random_host_buffer(64)];
    backend
        .execute(&executable, &inputs, default_device())
        .expect("execute");

    fixture.expect_counter_changed("ExecuteProgram", None);
    // Nothing in this body touched the transfer paths.
    fixture.expect_counter_not_changed("TransferToDevice|TransferFromDevice", None);
}

/// First compile of a pipeline is uncached; recompiling hits the cache.
#[test]
#[serial]
fn compile_cache_is_observable_through_counter_windows() {
    let mut fixture = DeviceTest::start();
    let backend = backend::backend().expect("backend registered by fixture");

    // The scale constant makes this pipeline unique to this test, so the
    // process-wide compile cache cannot already hold it.
    let program = Program::new("itest-cache", vec![OpKind::Scale(0.734_251), OpKind::Sum]);

    backend.compile(&program).expect("first compile");
    fixture.expect_counter_changed("UncachedCompile", None);

    fixture.reset_checkpoint();
    backend.compile(&program).expect("second compile");
    fixture.expect_counter_changed("CachedCompile", None);
    fixture.expect_counter_not_changed("UncachedCompile", None);
}

/// Transfers bump their counters and only their counters.
#[test]
#[serial]
fn transfers_bump_transfer_counters() {
    let mut fixture = DeviceTest::start();
    let backend = backend::backend().expect("backend registered by fixture");
    let device = default_device();

    let tensor = backend
        .transfer_to_device(&[1.0, 2.0, 3.0], device)
        .expect("transfer to device");
    let back = backend
        .transfer_from_device(&tensor)
        .expect("transfer from device");
    assert_eq!(back, vec![1.0, 2.0, 3.0]);

    fixture.expect_counter_changed("TransferToDevice", None);
    fixture.expect_counter_changed("TransferFromDevice", None);
    fixture.expect_counter_not_changed("ExecuteProgram", None);
}

/// A scheduled execution bumps ScheduleExecute from its worker thread.
#[test]
#[serial]
fn scheduled_execution_bumps_counter_from_worker() {
    let mut fixture = DeviceTest::start();
    let backend = backend::backend().expect("backend registered by fixture");

    let program = Program::new("itest-scheduled", vec![OpKind::Scale(3.5)]);
    let executable = backend.compile(&program).expect("compile");
    let pending = Arc::clone(&backend)
        .schedule(executable, vec![vec![1.0, 2.0]], default_device())
        .expect("schedule");
    assert_eq!(pending.wait().expect("wait"), vec![3.5, 7.0]);

    fixture.expect_counter_changed("ScheduleExecute", None);
    fixture.expect_counter_changed("ExecuteProgram", None);
}

/// An execute-only window changes nothing but ExecuteProgram.
#[test]
#[serial]
fn execute_window_is_clean_apart_from_execute_counter() {
    let mut fixture = DeviceTest::start();
    let backend = backend::backend().expect("backend registered by fixture");

    let program = Program::new("itest-clean", vec![OpKind::Scale(1.125)]);
    let executable = backend.compile(&program).expect("compile");

    // New window: the compile above is out of scope.
    fixture.reset_checkpoint();
    backend
        .execute(&executable, &[vec![1.0; 32]], default_device())
        .expect("execute");

    fixture.expect_counter_not_changed(".*", Some(&ignore(&["ExecuteProgram"])));
}

/// Fixture start reseeds host and device RNGs, so randomized programs
/// produce identical outputs across fixtures.
#[test]
#[serial]
fn fixture_seeding_makes_randomized_runs_reproducible() {
    let program = Program::new("itest-noise", vec![OpKind::Randomize, OpKind::Sum]);

    let run = || {
        let fixture = DeviceTest::start();
        let backend = backend::backend().expect("backend registered by fixture");
        let executable = backend.compile(&program).expect("compile");
        let inputs = vec![rng::random_host_buffer(128)];
        let output = backend
            .execute(&executable, &inputs, default_device())
            .expect("execute");
        drop(fixture);
        output
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
}

/// A quiet window stays quiet: no counter changes without backend work.
#[test]
#[serial]
fn idle_window_reports_no_changes() {
    let mut fixture = DeviceTest::start();
    fixture.expect_counter_not_changed(".*", None);
}
