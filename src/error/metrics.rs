// Metrics error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Metrics error code constants
///
/// Error code range: 3001
pub struct MetricsErrorCodes {}

impl MetricsErrorCodes {
    /// Counter-name pattern failed to compile as a regular expression
    pub const INVALID_PATTERN: i32 = 3001;
}

/// Log a metrics error with structured context
pub fn log_metrics_error(err: &MetricsError, context: &str) {
    error!(
        "Metrics error in {}: code={}, component=MetricsSnapshot, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Metrics snapshot errors
///
/// Snapshot capture and diffing are pure reads over materialized data; the
/// only failure mode is a counter-name pattern that does not compile.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsError {
    /// Counter-name pattern failed to compile as a regular expression
    InvalidPattern { pattern: String, reason: String },
}

impl ErrorCode for MetricsError {
    fn code(&self) -> i32 {
        match self {
            MetricsError::InvalidPattern { .. } => MetricsErrorCodes::INVALID_PATTERN,
        }
    }

    fn message(&self) -> String {
        match self {
            MetricsError::InvalidPattern { pattern, reason } => {
                format!("Invalid counter pattern '{}': {}", pattern, reason)
            }
        }
    }
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetricsError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MetricsError {}
