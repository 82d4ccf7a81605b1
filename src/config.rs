//! Runtime configuration for the execution backend.
//!
//! Parameters are loaded from a JSON file next to the process working
//! directory so backend sizing can be adjusted without recompilation. Every
//! failure path falls back to defaults with a warning; a malformed config
//! never aborts the runtime.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub compile: CompileConfig,
}

/// Execution path parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of virtual devices the native backend exposes
    #[serde(default = "default_device_count")]
    pub device_count: usize,
    /// Log execution stats every N program executions (0 disables)
    #[serde(default = "default_log_every_n_executions")]
    pub log_every_n_executions: u64,
}

/// Compile cache parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Maximum number of cached executables before FIFO eviction
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_device_count() -> usize {
    1
}

fn default_log_every_n_executions() -> u64 {
    100
}

fn default_cache_capacity() -> usize {
    64
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            device_count: default_device_count(),
            log_every_n_executions: default_log_every_n_executions(),
        }
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for RuntimeConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            compile: CompileConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from JSON file
    ///
    /// Falls back to defaults (with a warning) if the file does not exist
    /// or fails to parse.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the conventional location
    pub fn load() -> Self {
        Self::load_from_file("tensorlink.json")
    }
}
