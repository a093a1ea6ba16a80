//! V8-backed workers exchanging string messages with the host.
//!
//! Each [`Worker`] owns a dedicated V8 isolate and context. The host talks to
//! the script through `send`/`send_sync`; the script talks back through the
//! `send`/`sendSync` globals, routed to the callbacks registered for the
//! worker in the process-wide [`HandleRegistry`].

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod origin;

mod exception;
mod loader;
mod ops;
mod runner;
mod watchdog;

use once_cell::sync::OnceCell;
use tracing::debug;

/// Global V8 platform instance together with the settings it was built from.
///
/// V8 requires exactly one platform to be initialized before creating isolates.
static V8_PLATFORM: OnceCell<(v8::SharedRef<v8::Platform>, EngineConfig)> = OnceCell::new();

fn build_platform(config: EngineConfig) -> (v8::SharedRef<v8::Platform>, EngineConfig) {
    if let Some(flags) = &config.v8_flags {
        v8::V8::set_flags_from_string(flags);
    }

    let platform = v8::new_default_platform(config.thread_pool_size, false).make_shared();
    v8::V8::initialize_platform(platform.clone());
    v8::V8::initialize();

    debug!(
        version = v8::V8::get_version(),
        threads = config.thread_pool_size,
        "V8 platform initialized"
    );
    (platform, config)
}

/// Initialize the V8 platform with `config`.
///
/// Succeeds without effect when the platform is already running with an equal
/// configuration. A different configuration cannot be applied after the fact
/// and is reported as [`WorkerError::Initialization`].
pub fn initialize_platform(config: EngineConfig) -> Result<(), WorkerError> {
    let requested = config.clone();
    let (_, active) = V8_PLATFORM.get_or_init(|| build_platform(config));
    if *active != requested {
        return Err(WorkerError::Initialization(format!(
            "V8 platform already initialized with {active:?}"
        )));
    }
    Ok(())
}

/// Initialize the V8 platform exactly once with default settings.
///
/// This function is safe to call multiple times; subsequent calls are no-ops.
/// Creating a worker calls it implicitly.
pub fn initialize_platform_once() {
    V8_PLATFORM.get_or_init(|| build_platform(EngineConfig::default()));
}

/// Check if the V8 platform has been initialized.
pub fn is_platform_initialized() -> bool {
    V8_PLATFORM.get().is_some()
}

/// Version string of the embedded V8 engine.
pub fn engine_version() -> &'static str {
    v8::V8::get_version()
}

// Re-export key types for convenience
pub use channel::NON_STRING_REPLY;
pub use config::{EngineConfig, WorkerConfig};
pub use context::{TerminateHandle, Worker, WorkerStats};
pub use error::{RegistryError, WorkerError};
pub use handle::{discard_send_sync, registry, CallbackSet, HandleId, HandleRegistry};
pub use origin::ScriptOrigin;
