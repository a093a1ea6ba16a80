//! Per-isolate state and the bookkeeping for entering an isolate.
//!
//! A worker's isolate is entered only while a call into it is running. The
//! outermost call enters the isolate and opens a root handle scope. Calls made
//! from a host callback while the script is on the stack must not open a
//! second root scope, so every native callback records its scope in
//! [`CallFrames`] and nested calls build on the innermost one.

use crate::runtime::config::WorkerConfig;
use crate::runtime::error::WorkerError;
use crate::runtime::handle::HandleId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// State reachable from native callbacks through the isolate's slot.
pub(crate) struct IsolateState {
    pub handle_id: HandleId,
    pub print_enabled: bool,
    pub context: RefCell<Option<v8::Global<v8::Context>>>,
    pub recv: RefCell<Option<v8::Global<v8::Function>>>,
    pub recv_sync: RefCell<Option<v8::Global<v8::Function>>>,
    pub frames: CallFrames,
}

/// Slot type stored in every worker isolate.
pub(crate) type SharedState = Rc<IsolateState>;

impl IsolateState {
    pub fn new(handle_id: HandleId, print_enabled: bool) -> Self {
        Self {
            handle_id,
            print_enabled,
            context: RefCell::new(None),
            recv: RefCell::new(None),
            recv_sync: RefCell::new(None),
            frames: CallFrames::default(),
        }
    }

    /// Fetch the state of the isolate a callback is running in.
    pub fn from_scope(scope: &mut v8::HandleScope) -> Option<SharedState> {
        scope.get_slot::<SharedState>().cloned()
    }

    pub fn context<'s>(
        &self,
        scope: &mut v8::HandleScope<'s, ()>,
    ) -> Option<v8::Local<'s, v8::Context>> {
        self.context
            .borrow()
            .as_ref()
            .map(|context| v8::Local::new(scope, context))
    }

    pub fn recv<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
    ) -> Option<v8::Local<'s, v8::Function>> {
        self.recv
            .borrow()
            .as_ref()
            .map(|recv| v8::Local::new(scope, recv))
    }

    pub fn recv_sync<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
    ) -> Option<v8::Local<'s, v8::Function>> {
        self.recv_sync
            .borrow()
            .as_ref()
            .map(|recv_sync| v8::Local::new(scope, recv_sync))
    }

    /// Drop every persistent handle. Must run while the isolate is alive.
    pub fn clear(&self) {
        self.recv.borrow_mut().take();
        self.recv_sync.borrow_mut().take();
        self.context.borrow_mut().take();
    }
}

/// Stack of handle scopes belonging to native callbacks that are currently
/// running host code.
#[derive(Default)]
pub(crate) struct CallFrames {
    scopes: RefCell<Vec<*mut v8::HandleScope<'static>>>,
}

impl CallFrames {
    /// Record `scope` until the returned guard is dropped.
    pub fn push<'a>(&'a self, scope: &mut v8::HandleScope) -> FrameGuard<'a> {
        let ptr = scope as *mut v8::HandleScope as *mut v8::HandleScope<'static>;
        self.scopes.borrow_mut().push(ptr);
        FrameGuard { frames: self }
    }

    /// Innermost scope, if a native callback is active.
    pub fn top(&self) -> Option<*mut v8::HandleScope<'static>> {
        self.scopes.borrow().last().copied()
    }
}

pub(crate) struct FrameGuard<'a> {
    frames: &'a CallFrames,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.frames.scopes.borrow_mut().pop();
    }
}

/// Keeps an isolate entered on the current thread for the guard's lifetime.
///
/// Entries nest, so a host callback running in one worker may enter another.
pub(crate) struct EnteredIsolate {
    isolate: *mut v8::Isolate,
}

impl EnteredIsolate {
    /// # Safety
    ///
    /// `isolate` must outlive the guard, and guards must be dropped in reverse
    /// order of creation on the same thread.
    pub unsafe fn enter(isolate: &mut v8::Isolate) -> Self {
        isolate.enter();
        Self { isolate }
    }
}

impl Drop for EnteredIsolate {
    fn drop(&mut self) {
        // SAFETY: upheld by the caller of `enter`.
        unsafe { (*self.isolate).exit() }
    }
}

/// Counts nested calls so that only the outermost one arms the watchdog and
/// reports termination.
#[derive(Default)]
pub(crate) struct CallDepth(Cell<usize>);

impl CallDepth {
    pub fn enter(&self) -> DepthGuard<'_> {
        self.0.set(self.0.get() + 1);
        DepthGuard(&self.0)
    }
}

pub(crate) struct DepthGuard<'a>(&'a Cell<usize>);

impl DepthGuard<'_> {
    pub fn is_outermost(&self) -> bool {
        self.0.get() == 1
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Isolate creation parameters derived from a validated config.
pub(crate) fn create_params(config: &WorkerConfig) -> Result<v8::CreateParams, WorkerError> {
    config.validate()?;

    let params = v8::CreateParams::default();
    Ok(match (config.max_heap_size, config.initial_heap_size) {
        (Some(max), initial) => params.heap_limits(initial.unwrap_or(0), max),
        (None, _) => params,
    })
}
