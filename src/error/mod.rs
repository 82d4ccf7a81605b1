// Error types for the tensorlink runtime
//
// This module defines custom error types for backend execution and metrics
// operations, providing structured error handling with stable numeric codes.

mod backend;
mod metrics;

pub use backend::{log_backend_error, BackendError, BackendErrorCodes};
pub use metrics::{log_metrics_error, MetricsError, MetricsErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the crate's surfaces (library, harness, CLI).
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
