//! Isolated V8 workers with a string message channel.
//!
//! A host creates [`Worker`]s, loads scripts into them, and exchanges UTF-8
//! messages in both directions:
//!
//! * host → script with [`Worker::send`] and [`Worker::send_sync`], received
//!   by the handlers the script registers with `recv(fn)` and `recvSync(fn)`;
//! * script → host with `send(str)` and `sendSync(str)`, received by the
//!   callbacks passed to [`Worker::new`].
//!
//! Scripts also get `print(...args)`, and each global is available with a
//! `$` prefix (`$send`, `$recv`, ...).

pub mod runtime;

pub use runtime::{
    discard_send_sync, engine_version, initialize_platform, initialize_platform_once,
    is_platform_initialized, registry, CallbackSet, EngineConfig, HandleId, HandleRegistry,
    RegistryError, ScriptOrigin, TerminateHandle, Worker, WorkerConfig, WorkerError, WorkerStats,
    NON_STRING_REPLY,
};
