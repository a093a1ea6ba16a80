//! Handle table mapping worker ids to host callbacks.
//!
//! Native code never sees a pointer to host state. Each worker is tagged with
//! a small integer [`HandleId`]; every callback out of the engine carries that
//! id and resolves it here to the [`CallbackSet`] registered at creation.

use crate::runtime::error::RegistryError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Host callback for fire-and-forget messages sent by the script.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Host callback answering synchronous requests sent by the script.
pub type SyncMessageCallback = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Host callback receiving the script's `print` output.
pub type PrintCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Sync handler for hosts that never answer `sendSync`.
pub fn discard_send_sync(_msg: &str) -> String {
    String::new()
}

/// Integer key identifying one live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u32);

impl HandleId {
    /// Raw integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callbacks registered for one worker. Immutable once registered.
#[derive(Clone)]
pub struct CallbackSet {
    pub(crate) on_message: MessageCallback,
    pub(crate) on_sync_message: SyncMessageCallback,
    pub(crate) on_print: Option<PrintCallback>,
}

impl CallbackSet {
    /// Callbacks for `send` and `sendSync`; `print` goes to stdout.
    pub fn new<M, S>(on_message: M, on_sync_message: S) -> Self
    where
        M: Fn(&str) + Send + Sync + 'static,
        S: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            on_message: Arc::new(on_message),
            on_sync_message: Arc::new(on_sync_message),
            on_print: None,
        }
    }

    /// Route the script's `print` output to `on_print` instead of stdout.
    pub fn with_print<P>(mut self, on_print: P) -> Self
    where
        P: Fn(&str) + Send + Sync + 'static,
    {
        self.on_print = Some(Arc::new(on_print));
        self
    }
}

impl Default for CallbackSet {
    fn default() -> Self {
        Self::new(|_| {}, discard_send_sync)
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("on_print", &self.on_print.is_some())
            .finish_non_exhaustive()
    }
}

struct Table {
    entries: HashMap<HandleId, Arc<CallbackSet>>,
    next_id: u32,
}

/// Registry of live workers.
///
/// Lookups (one per callback out of the engine) share a read lock; allocation
/// and erasure take the write lock.
pub struct HandleRegistry {
    table: RwLock<Table>,
}

impl HandleRegistry {
    /// Empty registry. Workers use the process-wide [`registry`].
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table {
                entries: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Register a callback set and return its fresh id.
    ///
    /// Ids are handed out in increasing order. After the counter wraps, ids
    /// that are still live are skipped.
    pub fn allocate(&self, callbacks: CallbackSet) -> HandleId {
        let mut table = self.table.write();
        let mut candidate = HandleId(table.next_id);
        while table.entries.contains_key(&candidate) {
            candidate = HandleId(candidate.0.wrapping_add(1));
        }
        table.next_id = candidate.0.wrapping_add(1);
        table.entries.insert(candidate, Arc::new(callbacks));
        candidate
    }

    /// Resolve an id to its callbacks.
    ///
    /// The returned `Arc` outlives the read lock, so callers may run host
    /// code that creates or disposes workers without deadlocking.
    pub fn lookup(&self, id: HandleId) -> Result<Arc<CallbackSet>, RegistryError> {
        self.table
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Remove an entry. Returns `false` if it was already gone.
    pub fn erase(&self, id: HandleId) -> bool {
        self.table.write().entries.remove(&id).is_some()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: HandleId) -> bool {
        self.table.read().entries.contains_key(&id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Whether no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    #[cfg(test)]
    fn with_next_id(next_id: u32) -> Self {
        let registry = Self::new();
        registry.table.write().next_id = next_id;
        registry
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<HandleRegistry> = Lazy::new(HandleRegistry::new);

/// The process-wide registry shared by every worker.
pub fn registry() -> &'static HandleRegistry {
    &REGISTRY
}
