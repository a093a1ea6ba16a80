//! String message channel between the host and a running script.
//!
//! Host to script: [`deliver`] and [`deliver_sync`] call the handlers the
//! script registered with `recv` and `recvSync`.
//!
//! Script to host: the `on_native_*` entry points resolve the worker's
//! [`HandleId`] to its callbacks and run them on the calling thread. A panic in
//! host code is caught and handed back as a message so the caller can raise
//! it inside the script instead of unwinding through the engine.

use crate::runtime::error::WorkerError;
use crate::runtime::exception;
use crate::runtime::handle::{registry, CallbackSet, HandleId};
use crate::runtime::loader::new_string;
use crate::runtime::runner::IsolateState;
use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Reply to `send_sync` when the script's handler is missing or did not
/// return a string.
pub const NON_STRING_REPLY: &str = "err: non-string return value";

/// Call the script's `recv` handler with `msg`.
pub(crate) fn deliver(
    scope: &mut v8::HandleScope,
    state: &IsolateState,
    msg: &str,
) -> Result<(), WorkerError> {
    let tc = &mut v8::TryCatch::new(scope);
    let Some(recv) = state.recv(tc) else {
        return Err(WorkerError::MissingHandler("recv"));
    };

    let arg = new_string(tc, msg)?;
    let global = tc.get_current_context().global(tc);
    if recv.call(tc, global.into(), &[arg.into()]).is_none() {
        return Err(caught(tc));
    }
    Ok(())
}

/// Call the script's `recvSync` handler with `msg` and return its reply.
pub(crate) fn deliver_sync(
    scope: &mut v8::HandleScope,
    state: &IsolateState,
    msg: &str,
) -> Result<String, WorkerError> {
    let tc = &mut v8::TryCatch::new(scope);
    let Some(handler) = state.recv_sync(tc) else {
        trace!(handle_id = %state.handle_id, "recvSync not registered");
        return Ok(NON_STRING_REPLY.to_string());
    };

    let arg = new_string(tc, msg)?;
    let global = tc.get_current_context().global(tc);
    match handler.call(tc, global.into(), &[arg.into()]) {
        Some(reply) if reply.is_string() => Ok(reply.to_rust_string_lossy(tc)),
        Some(_) => Ok(NON_STRING_REPLY.to_string()),
        None => Err(caught(tc)),
    }
}

fn caught(tc: &mut v8::TryCatch<v8::HandleScope>) -> WorkerError {
    if tc.has_terminated() {
        WorkerError::Terminated
    } else {
        WorkerError::Handler(exception::render(tc))
    }
}

/// Forward a fire-and-forget message from the script to the host.
pub fn on_native_message(text: &str, id: HandleId) -> Result<(), String> {
    dispatch(id, "send", |callbacks| (callbacks.on_message)(text))
}

/// Forward a synchronous request from the script and return the host's reply.
pub fn on_native_sync_message(text: &str, id: HandleId) -> Result<String, String> {
    dispatch(id, "sendSync", |callbacks| (callbacks.on_sync_message)(text))
}

/// Emit one line of script output, through the host's print callback when one
/// is registered and to stdout otherwise.
pub fn on_native_print(line: &str, id: HandleId) -> Result<(), String> {
    dispatch(id, "print", |callbacks| match &callbacks.on_print {
        Some(on_print) => on_print(line),
        None => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
    })
}

fn dispatch<R>(id: HandleId, op: &str, f: impl FnOnce(&CallbackSet) -> R) -> Result<R, String> {
    let callbacks: Arc<CallbackSet> = match registry().lookup(id) {
        Ok(callbacks) => callbacks,
        Err(err) => {
            error!(handle_id = %id, op, "{err}");
            panic!("{err} during {op}");
        }
    };

    panic::catch_unwind(AssertUnwindSafe(|| f(&callbacks))).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(handle_id = %id, op, "host callback panicked: {message}");
        format!("host callback panicked: {message}")
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
