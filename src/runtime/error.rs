//! Error types for worker operations.

use crate::runtime::handle::HandleId;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`Worker`](crate::Worker) operations.
///
/// Script-originated variants carry the engine's rendered exception text,
/// which is also what [`Worker::last_exception`](crate::Worker::last_exception)
/// returns right after the failing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Source text failed to compile.
    #[error("{0}")]
    Compile(String),

    /// An uncaught exception escaped top-level execution.
    #[error("{0}")]
    Runtime(String),

    /// A script-registered `recv`/`recvSync` handler threw.
    #[error("{0}")]
    Handler(String),

    /// `send` was called before the script registered a handler.
    #[error("${0} not called")]
    MissingHandler(&'static str),

    /// Execution was interrupted by `terminate_execution`.
    #[error("Script execution terminated")]
    Terminated,

    /// Execution was interrupted by the worker's execution timeout.
    #[error("Script execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The engine platform could not be initialized as requested.
    #[error("Engine initialization failed: {0}")]
    Initialization(String),

    /// Invalid worker configuration.
    #[error("Invalid worker configuration: {0}")]
    Config(String),

    /// Host input that cannot cross into the engine.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl WorkerError {
    /// Engine exception text for errors raised by script code.
    pub fn exception(&self) -> Option<&str> {
        match self {
            Self::Compile(text) | Self::Runtime(text) | Self::Handler(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the call was aborted by termination rather than by the script.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Terminated | Self::Timeout(_))
    }
}

/// Errors returned by the handle registry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No worker registered for handle {0}")]
    NotFound(HandleId),
}
