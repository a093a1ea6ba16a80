//! Worker - one isolated script execution context.

use crate::runtime::channel;
use crate::runtime::config::WorkerConfig;
use crate::runtime::error::WorkerError;
use crate::runtime::handle::{registry, CallbackSet, HandleId};
use crate::runtime::initialize_platform_once;
use crate::runtime::loader;
use crate::runtime::ops;
use crate::runtime::origin::ScriptOrigin;
use crate::runtime::runner::{self, CallDepth, EnteredIsolate, IsolateState, SharedState};
use crate::runtime::watchdog::Watchdog;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Frames captured for stack traces of uncaught exceptions.
const STACK_TRACE_FRAMES: i32 = 10;

/// Per-worker call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub loads: u64,
    pub failed_loads: u64,
    pub sends: u64,
    pub sync_sends: u64,
    pub failed_deliveries: u64,
}

/// Thread-safe handle that interrupts a worker's running script.
#[derive(Clone)]
pub struct TerminateHandle {
    isolate: v8::IsolateHandle,
    handle_id: HandleId,
}

impl TerminateHandle {
    /// Interrupt whatever script the worker is running, or the next one it
    /// runs. Returns `false` once the worker's isolate is gone.
    pub fn terminate_execution(&self) -> bool {
        let delivered = self.isolate.terminate_execution();
        debug!(handle_id = %self.handle_id, delivered, "termination requested");
        delivered
    }

    /// Registry key of the worker this handle belongs to.
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }
}

impl fmt::Debug for TerminateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminateHandle")
            .field("handle_id", &self.handle_id)
            .finish_non_exhaustive()
    }
}

/// An isolated script execution context backed by its own V8 isolate.
///
/// A worker is bound to the thread that created it. Host callbacks run
/// synchronously on that thread while the triggering call is on the stack,
/// and may call back into the same worker.
///
/// Example:
/// ```no_run
/// use jsworker::Worker;
///
/// let worker = Worker::new(
///     |msg| println!("script says {msg}"),
///     |req| format!("host got {req}"),
/// )?;
///
/// worker.load("main.js", "recv(function (m) { send(m + ' back'); });")?;
/// worker.send("ping")?;
/// worker.dispose();
/// # Ok::<(), jsworker::WorkerError>(())
/// ```
pub struct Worker {
    isolate: UnsafeCell<Option<v8::OwnedIsolate>>,
    state: SharedState,
    handle_id: HandleId,
    terminate: TerminateHandle,
    watchdog: Option<Watchdog>,
    depth: CallDepth,
    last_exception: RefCell<Option<String>>,
    retired: Cell<bool>,
    stats: Cell<WorkerStats>,
}

impl Worker {
    /// Create a worker with default configuration.
    pub fn new<M, S>(on_message: M, on_sync_message: S) -> Result<Self, WorkerError>
    where
        M: Fn(&str) + Send + Sync + 'static,
        S: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::with_callbacks(CallbackSet::new(on_message, on_sync_message))
    }

    /// Create a worker with default configuration from a prepared callback set.
    pub fn with_callbacks(callbacks: CallbackSet) -> Result<Self, WorkerError> {
        Self::with_config(WorkerConfig::default(), callbacks)
    }

    pub fn with_config(config: WorkerConfig, callbacks: CallbackSet) -> Result<Self, WorkerError> {
        initialize_platform_once();
        let params = runner::create_params(&config)?;

        let handle_id = registry().allocate(callbacks);
        let state: SharedState = Rc::new(IsolateState::new(handle_id, config.enable_print));

        let mut isolate = v8::Isolate::new(params);
        isolate.set_capture_stack_trace_for_uncaught_exceptions(true, STACK_TRACE_FRAMES);
        isolate.set_slot(state.clone());

        if let Err(err) = build_context(&mut isolate, &state) {
            state.clear();
            registry().erase(handle_id);
            drop(isolate);
            return Err(err);
        }

        let terminate = TerminateHandle {
            isolate: isolate.thread_safe_handle(),
            handle_id,
        };

        // Isolates are entered only for the duration of a call.
        // SAFETY: the isolate was entered by `Isolate::new` on this thread.
        unsafe { isolate.exit() };

        let mut worker = Self {
            isolate: UnsafeCell::new(Some(isolate)),
            state,
            handle_id,
            terminate,
            watchdog: None,
            depth: CallDepth::default(),
            last_exception: RefCell::new(None),
            retired: Cell::new(false),
            stats: Cell::new(WorkerStats::default()),
        };

        if let Some(timeout) = config.execution_timeout {
            let handle = worker.terminate.clone();
            let watchdog = Watchdog::spawn(
                format!("jsworker-watchdog-{handle_id}"),
                timeout,
                move || {
                    handle.terminate_execution();
                },
            )
            .map_err(|err| {
                WorkerError::Initialization(format!("failed to spawn watchdog thread: {err}"))
            })?;
            worker.watchdog = Some(watchdog);
        }

        debug!(handle_id = %handle_id, "worker created");

        if let Some(script) = &config.bootstrap_script {
            worker.load_with_origin(&ScriptOrigin::new("<bootstrap>"), script)?;
        }

        Ok(worker)
    }

    /// Compile and run `source` as a top-level script named `name`.
    pub fn load(&self, name: &str, source: &str) -> Result<(), WorkerError> {
        self.load_with_origin(&ScriptOrigin::new(name), source)
    }

    /// Compile and run `source` with full origin metadata.
    pub fn load_with_origin(&self, origin: &ScriptOrigin, source: &str) -> Result<(), WorkerError> {
        trace!(
            handle_id = %self.handle_id,
            name = %origin.name,
            bytes = source.len(),
            "loading script"
        );
        let result = self.call(|scope, _| loader::compile_and_run(scope, origin, source));
        self.bump(|stats| {
            stats.loads += 1;
            if result.is_err() {
                stats.failed_loads += 1;
            }
        });
        result
    }

    /// Deliver `msg` to the handler registered with `recv`.
    pub fn send(&self, msg: &str) -> Result<(), WorkerError> {
        let result = self.call(|scope, state| channel::deliver(scope, state, msg));
        self.bump(|stats| {
            stats.sends += 1;
            if result.is_err() {
                stats.failed_deliveries += 1;
            }
        });
        result
    }

    /// Deliver `msg` to the handler registered with `recvSync` and return its
    /// reply. A missing handler or a non-string reply yields
    /// [`NON_STRING_REPLY`](crate::NON_STRING_REPLY).
    pub fn send_sync(&self, msg: &str) -> Result<String, WorkerError> {
        let result = self.call(|scope, state| channel::deliver_sync(scope, state, msg));
        self.bump(|stats| {
            stats.sync_sends += 1;
            if result.is_err() {
                stats.failed_deliveries += 1;
            }
        });
        result
    }

    /// Interrupt the running script. See [`TerminateHandle::terminate_execution`].
    pub fn terminate_execution(&self) -> bool {
        self.terminate.terminate_execution()
    }

    /// Handle for terminating this worker from another thread.
    pub fn terminate_handle(&self) -> TerminateHandle {
        self.terminate.clone()
    }

    /// Registry key of this worker.
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    /// Text of the most recent failure, kept until the next failure.
    pub fn last_exception(&self) -> Option<String> {
        self.last_exception.borrow().clone()
    }

    /// Whether a terminated call has retired this worker.
    pub fn is_terminated(&self) -> bool {
        self.retired.get()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> WorkerStats {
        self.stats.get()
    }

    /// Release the isolate and the registry entry.
    pub fn dispose(mut self) {
        self.release();
    }

    fn bump(&self, update: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn call<R>(
        &self,
        f: impl FnOnce(&mut v8::HandleScope, &IsolateState) -> Result<R, WorkerError>,
    ) -> Result<R, WorkerError> {
        let result = if self.retired.get() {
            Err(WorkerError::Terminated)
        } else {
            self.call_entered(f)
        };

        if let Err(err) = &result {
            *self.last_exception.borrow_mut() = Some(err.to_string());
        }
        result
    }

    fn call_entered<R>(
        &self,
        f: impl FnOnce(&mut v8::HandleScope, &IsolateState) -> Result<R, WorkerError>,
    ) -> Result<R, WorkerError> {
        let depth = self.depth.enter();
        let watchdog = self.watchdog.as_ref().filter(|_| depth.is_outermost());
        if let Some(watchdog) = watchdog {
            watchdog.arm();
        }

        let result = self.with_scope(|scope| f(scope, &self.state));

        let timed_out = watchdog.is_some_and(Watchdog::disarm);
        match result {
            Err(WorkerError::Terminated) => {
                self.retired.set(true);
                match watchdog.filter(|_| timed_out) {
                    Some(watchdog) => {
                        warn!(
                            handle_id = %self.handle_id,
                            timeout_ms = watchdog.timeout().as_millis() as u64,
                            "execution timed out"
                        );
                        Err(WorkerError::Timeout(watchdog.timeout()))
                    }
                    None => {
                        warn!(handle_id = %self.handle_id, "execution terminated");
                        Err(WorkerError::Terminated)
                    }
                }
            }
            other => {
                if timed_out {
                    // The deadline passed after the script had already returned.
                    let _ = self.terminate.isolate.cancel_terminate_execution();
                }
                if let Err(err) = &other {
                    debug!(handle_id = %self.handle_id, error = %err, "call failed");
                }
                other
            }
        }
    }

    fn with_scope<R>(
        &self,
        f: impl FnOnce(&mut v8::HandleScope) -> Result<R, WorkerError>,
    ) -> Result<R, WorkerError> {
        if let Some(frame) = self.state.frames.top() {
            // SAFETY: the frame is the scope of a native callback of this
            // isolate that is still on the stack below us.
            let outer = unsafe { &mut *frame };
            // Another worker's isolate may be current if that worker's host
            // callback called back into this one.
            // SAFETY: the isolate outlives the frame, and the guard is dropped
            // after the scope below.
            let _entered = unsafe { EnteredIsolate::enter(outer) };
            let scope = &mut v8::HandleScope::new(outer);
            return f(scope);
        }

        // SAFETY: no other reference into the isolate exists: calls reach this
        // point only when no native callback of this worker is active.
        let isolate = unsafe { &mut *self.isolate.get() };
        let isolate = isolate.as_mut().ok_or(WorkerError::Terminated)?;

        // SAFETY: the guard is dropped at the end of this function, after the
        // scopes below and before any enclosing guard.
        let _entered = unsafe { EnteredIsolate::enter(isolate) };
        let scope = &mut v8::HandleScope::new(isolate);
        let context = self.state.context(scope).ok_or_else(|| {
            WorkerError::Initialization("worker context is not available".to_string())
        })?;
        let scope = &mut v8::ContextScope::new(scope, context);
        f(scope)
    }

    fn release(&mut self) {
        let Some(mut isolate) = self.isolate.get_mut().take() else {
            return;
        };

        self.watchdog.take();
        registry().erase(self.handle_id);

        // `OwnedIsolate` must be the entered isolate when it is dropped.
        // SAFETY: the isolate is alive and owned by this thread.
        unsafe { isolate.enter() };
        self.state.clear();
        drop(isolate);

        debug!(handle_id = %self.handle_id, "worker released");
    }
}

fn build_context(isolate: &mut v8::OwnedIsolate, state: &IsolateState) -> Result<(), WorkerError> {
    let scope = &mut v8::HandleScope::new(isolate);
    let context = v8::Context::new(scope, Default::default());
    let scope = &mut v8::ContextScope::new(scope, context);
    ops::install(scope)?;
    *state.context.borrow_mut() = Some(v8::Global::new(scope, context));
    Ok(())
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.isolate.get_mut().is_some() {
            trace!(handle_id = %self.handle_id, "finalizing worker that was not disposed");
        }
        self.release();
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("handle_id", &self.handle_id)
            .field("terminated", &self.retired.get())
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}
