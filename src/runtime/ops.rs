//! Native functions exposed to scripts.
//!
//! Every worker context gets `print`, `recv`, `recvSync`, `send` and
//! `sendSync` on its global object, each also reachable with a `$` prefix.
//! The callbacks find their worker through the [`IsolateState`] stored in the
//! isolate slot and never touch host state directly.

use crate::runtime::channel;
use crate::runtime::error::WorkerError;
use crate::runtime::runner::IsolateState;

/// A script-visible global: name and native callback.
struct Op {
    name: &'static str,
    callback: v8::FunctionCallback,
}

fn ops() -> [Op; 5] {
    [
        Op {
            name: "print",
            callback: v8::MapFnTo::map_fn_to(op_print),
        },
        Op {
            name: "recv",
            callback: v8::MapFnTo::map_fn_to(op_recv),
        },
        Op {
            name: "recvSync",
            callback: v8::MapFnTo::map_fn_to(op_recv_sync),
        },
        Op {
            name: "send",
            callback: v8::MapFnTo::map_fn_to(op_send),
        },
        Op {
            name: "sendSync",
            callback: v8::MapFnTo::map_fn_to(op_send_sync),
        },
    ]
}

/// Install the primitives on the global object of the entered context.
pub(crate) fn install(scope: &mut v8::HandleScope) -> Result<(), WorkerError> {
    let global = scope.get_current_context().global(scope);

    for op in ops() {
        let function = v8::Function::new_raw(scope, op.callback).ok_or_else(|| {
            WorkerError::Initialization(format!("failed to create native function {}", op.name))
        })?;

        for name in [op.name.to_string(), format!("${}", op.name)] {
            let key = v8::String::new(scope, &name).ok_or_else(|| {
                WorkerError::Initialization(format!("failed to allocate global name {name}"))
            })?;
            if global.set(scope, key.into(), function.into()) != Some(true) {
                return Err(WorkerError::Initialization(format!(
                    "failed to install global {name}"
                )));
            }
        }
    }

    Ok(())
}

fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(text) = v8::String::new(scope, message) {
        let exception = v8::Exception::type_error(scope, text);
        scope.throw_exception(exception);
    }
}

fn throw_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(text) = v8::String::new(scope, message) {
        let exception = v8::Exception::error(scope, text);
        scope.throw_exception(exception);
    }
}

fn string_arg(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    op: &str,
) -> Option<String> {
    let value = args.get(0);
    if !value.is_string() {
        throw_type_error(scope, &format!("{op} expects a string argument"));
        return None;
    }
    Some(value.to_rust_string_lossy(scope))
}

fn function_arg<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: &v8::FunctionCallbackArguments<'s>,
    op: &str,
) -> Option<v8::Local<'s, v8::Function>> {
    match v8::Local::<v8::Function>::try_from(args.get(0)) {
        Ok(function) => Some(function),
        Err(_) => {
            throw_type_error(scope, &format!("{op} expects a function argument"));
            None
        }
    }
}

fn op_print(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let Some(state) = IsolateState::from_scope(scope) else {
        return;
    };
    if !state.print_enabled {
        return;
    }

    let line = (0..args.length())
        .map(|i| args.get(i).to_rust_string_lossy(scope))
        .collect::<Vec<_>>()
        .join(" ");

    let result = {
        let _frame = state.frames.push(scope);
        channel::on_native_print(&line, state.handle_id)
    };
    if let Err(message) = result {
        throw_error(scope, &message);
    }
}

fn op_recv<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    _rv: v8::ReturnValue,
) {
    let Some(function) = function_arg(scope, &args, "recv") else {
        return;
    };
    if let Some(state) = IsolateState::from_scope(scope) {
        *state.recv.borrow_mut() = Some(v8::Global::new(scope, function));
    }
}

fn op_recv_sync<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    _rv: v8::ReturnValue,
) {
    let Some(function) = function_arg(scope, &args, "recvSync") else {
        return;
    };
    if let Some(state) = IsolateState::from_scope(scope) {
        *state.recv_sync.borrow_mut() = Some(v8::Global::new(scope, function));
    }
}

fn op_send(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let Some(msg) = string_arg(scope, &args, "send") else {
        return;
    };
    let Some(state) = IsolateState::from_scope(scope) else {
        return;
    };

    let result = {
        let _frame = state.frames.push(scope);
        channel::on_native_message(&msg, state.handle_id)
    };
    if let Err(message) = result {
        throw_error(scope, &message);
    }
}

fn op_send_sync(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let Some(msg) = string_arg(scope, &args, "sendSync") else {
        return;
    };
    let Some(state) = IsolateState::from_scope(scope) else {
        return;
    };

    let result = {
        let _frame = state.frames.push(scope);
        channel::on_native_sync_message(&msg, state.handle_id)
    };
    match result {
        Ok(reply) => match v8::String::new(scope, &reply) {
            Some(reply) => rv.set(reply.into()),
            None => throw_error(scope, "sendSync reply exceeds the engine's string limit"),
        },
        Err(message) => throw_error(scope, &message),
    }
}
