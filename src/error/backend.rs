// Backend error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Backend error code constants
///
/// These constants provide a single source of truth for error codes
/// reported by the execution backend layer.
///
/// Error code range: 2001-2008
pub struct BackendErrorCodes {}

impl BackendErrorCodes {
    /// No execution backend has been registered
    pub const NOT_REGISTERED: i32 = 2001;

    /// A different execution backend is already registered
    pub const ALREADY_REGISTERED: i32 = 2002;

    /// Device is not exposed by the active backend
    pub const UNKNOWN_DEVICE: i32 = 2003;

    /// Program contains no operations
    pub const EMPTY_PROGRAM: i32 = 2004;

    /// Number of inputs does not match the program's arity
    pub const INPUT_ARITY_MISMATCH: i32 = 2005;

    /// Input buffer length does not match the pipeline shape
    pub const SHAPE_MISMATCH: i32 = 2006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2007;

    /// Program execution failed
    pub const EXECUTION_FAILED: i32 = 2008;
}

/// Log a backend error with structured context
///
/// Logs the error code, component, and message so failures in the
/// execution path are attributable without a debugger attached.
pub fn log_backend_error(err: &BackendError, context: &str) {
    error!(
        "Backend error in {}: code={}, component=ExecutionBackend, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Execution backend errors
///
/// These errors cover backend registration, program validation, and
/// execution of compiled programs.
///
/// Error code range: 2001-2008
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No execution backend has been registered
    NotRegistered,

    /// A different execution backend is already registered
    AlreadyRegistered { active: String, requested: String },

    /// Device is not exposed by the active backend
    UnknownDevice { device: String },

    /// Program contains no operations
    EmptyProgram { program: String },

    /// Number of inputs does not match the program's arity
    InputArityMismatch {
        program: String,
        expected: usize,
        actual: usize,
    },

    /// Input buffer length does not match the pipeline shape
    ShapeMismatch {
        program: String,
        expected: usize,
        actual: usize,
    },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Program execution failed
    ExecutionFailed { reason: String },
}

impl ErrorCode for BackendError {
    fn code(&self) -> i32 {
        match self {
            BackendError::NotRegistered => BackendErrorCodes::NOT_REGISTERED,
            BackendError::AlreadyRegistered { .. } => BackendErrorCodes::ALREADY_REGISTERED,
            BackendError::UnknownDevice { .. } => BackendErrorCodes::UNKNOWN_DEVICE,
            BackendError::EmptyProgram { .. } => BackendErrorCodes::EMPTY_PROGRAM,
            BackendError::InputArityMismatch { .. } => BackendErrorCodes::INPUT_ARITY_MISMATCH,
            BackendError::ShapeMismatch { .. } => BackendErrorCodes::SHAPE_MISMATCH,
            BackendError::LockPoisoned { .. } => BackendErrorCodes::LOCK_POISONED,
            BackendError::ExecutionFailed { .. } => BackendErrorCodes::EXECUTION_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            BackendError::NotRegistered => {
                "No execution backend registered. Call register_backend() first.".to_string()
            }
            BackendError::AlreadyRegistered { active, requested } => {
                format!(
                    "Backend '{}' is already registered; cannot register '{}'",
                    active, requested
                )
            }
            BackendError::UnknownDevice { device } => {
                format!("Unknown device: {}", device)
            }
            BackendError::EmptyProgram { program } => {
                format!("Program '{}' contains no operations", program)
            }
            BackendError::InputArityMismatch {
                program,
                expected,
                actual,
            } => {
                format!(
                    "Program '{}' expects {} inputs (got {})",
                    program, expected, actual
                )
            }
            BackendError::ShapeMismatch {
                program,
                expected,
                actual,
            } => {
                format!(
                    "Program '{}' input length mismatch: expected {} elements (got {})",
                    program, expected, actual
                )
            }
            BackendError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            BackendError::ExecutionFailed { reason } => {
                format!("Execution failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BackendError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for BackendError {}
