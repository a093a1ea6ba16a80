//! Compiles and runs classic scripts inside a worker's context.

use crate::runtime::error::WorkerError;
use crate::runtime::exception;
use crate::runtime::origin::ScriptOrigin;
use tracing::{debug, trace};

/// Allocate a V8 string, failing when the text exceeds V8's string limit.
pub(crate) fn new_string<'s>(
    scope: &mut v8::HandleScope<'s, ()>,
    text: &str,
) -> Result<v8::Local<'s, v8::String>, WorkerError> {
    v8::String::new(scope, text).ok_or_else(|| {
        WorkerError::InvalidInput(format!(
            "string of {} bytes exceeds the engine's string limit",
            text.len()
        ))
    })
}

fn to_v8_origin<'s>(
    scope: &mut v8::HandleScope<'s>,
    origin: &ScriptOrigin,
    name: &str,
) -> Result<v8::ScriptOrigin<'s>, WorkerError> {
    let resource_name = new_string(scope, name)?;
    let source_map_url = match origin.source_map_url.as_deref() {
        Some(url) => Some(new_string(scope, url)?.into()),
        None => None,
    };

    if origin.embedder_debug_script {
        trace!(name = %name, "embedder_debug_script has no engine counterpart; ignoring");
    }

    Ok(v8::ScriptOrigin::new(
        scope,
        resource_name.into(),
        origin.line_offset,
        origin.column_offset,
        origin.shared_cross_origin,
        origin.script_id,
        source_map_url,
        origin.opaque,
        false,
        false,
        None,
    ))
}

/// Compile `source` as a top-level script and run it to completion.
///
/// Compilation failures map to [`WorkerError::Compile`], uncaught exceptions
/// to [`WorkerError::Runtime`] and interrupted execution to
/// [`WorkerError::Terminated`].
pub(crate) fn compile_and_run(
    scope: &mut v8::HandleScope,
    origin: &ScriptOrigin,
    source: &str,
) -> Result<(), WorkerError> {
    let name = origin.resolved_name();
    let tc = &mut v8::TryCatch::new(scope);
    let v8_origin = to_v8_origin(tc, origin, &name)?;
    let code = new_string(tc, source)?;

    let Some(script) = v8::Script::compile(tc, code, Some(&v8_origin)) else {
        if tc.has_terminated() {
            return Err(WorkerError::Terminated);
        }
        let text = exception::render(tc);
        debug!(name = %name, "script failed to compile");
        return Err(WorkerError::Compile(text));
    };

    if script.run(tc).is_none() {
        if tc.has_terminated() {
            return Err(WorkerError::Terminated);
        }
        let text = exception::render(tc);
        debug!(name = %name, "script threw during execution");
        return Err(WorkerError::Runtime(text));
    }

    Ok(())
}
