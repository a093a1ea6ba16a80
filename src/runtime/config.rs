//! Worker and engine configuration.
//!
//! [`WorkerConfig`] tunes a single isolate (heap limits, execution timeout,
//! bootstrap code). [`EngineConfig`] tunes the process-wide V8 platform and is
//! only honoured by the first initialization.

use crate::runtime::error::WorkerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single worker isolate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum heap size in bytes (None = V8 default)
    pub max_heap_size: Option<usize>,

    /// Initial heap size in bytes (None = V8 default)
    pub initial_heap_size: Option<usize>,

    /// Upper bound on the duration of a single host call into the worker
    pub execution_timeout: Option<Duration>,

    /// Script run once right after the worker is created
    pub bootstrap_script: Option<String>,

    /// Whether the script's `print` produces output (default: true)
    pub enable_print: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_heap_size: None,
            initial_heap_size: None,
            execution_timeout: None,
            bootstrap_script: None,
            enable_print: true,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_heap_size(mut self, bytes: usize) -> Self {
        self.max_heap_size = Some(bytes);
        self
    }

    pub fn with_initial_heap_size(mut self, bytes: usize) -> Self {
        self.initial_heap_size = Some(bytes);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap_script = Some(source.into());
        self
    }

    pub fn with_print(mut self, enabled: bool) -> Self {
        self.enable_print = enabled;
        self
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.initial_heap_size.is_some() && self.max_heap_size.is_none() {
            return Err(WorkerError::Config(
                "initial_heap_size requires max_heap_size to be set as well".to_string(),
            ));
        }

        if let (Some(initial), Some(max)) = (self.initial_heap_size, self.max_heap_size) {
            if initial > max {
                return Err(WorkerError::Config(format!(
                    "initial_heap_size ({}) cannot exceed max_heap_size ({})",
                    initial, max
                )));
            }
        }

        if self.execution_timeout == Some(Duration::ZERO) {
            return Err(WorkerError::Config(
                "execution_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Process-wide V8 platform settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra V8 command-line flags, e.g. `"--expose-gc --stack-size=2048"`
    pub v8_flags: Option<String>,

    /// Worker threads for the default platform (0 = let V8 decide)
    pub thread_pool_size: u32,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.v8_flags = Some(flags.into());
        self
    }

    pub fn with_thread_pool_size(mut self, threads: u32) -> Self {
        self.thread_pool_size = threads;
        self
    }
}
