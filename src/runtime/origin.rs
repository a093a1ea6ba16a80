//! Origin metadata attached to each unit of loaded source.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(0);

/// Diagnostic attributes for a script, reported in stack traces and errors.
///
/// Offsets and the script id are passed to the engine verbatim; V8 counts
/// line and column offsets from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOrigin {
    pub name: String,
    pub line_offset: i32,
    pub column_offset: i32,
    pub script_id: i32,
    pub source_map_url: Option<String>,
    pub shared_cross_origin: bool,
    /// Kept for callers that tag debugger-only scripts. Current V8 has no
    /// equivalent option, so the loader does not forward it.
    pub embedder_debug_script: bool,
    pub opaque: bool,
}

impl ScriptOrigin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_line_offset(mut self, line_offset: i32) -> Self {
        self.line_offset = line_offset;
        self
    }

    pub fn with_column_offset(mut self, column_offset: i32) -> Self {
        self.column_offset = column_offset;
        self
    }

    pub fn with_script_id(mut self, script_id: i32) -> Self {
        self.script_id = script_id;
        self
    }

    pub fn with_source_map_url(mut self, url: impl Into<String>) -> Self {
        self.source_map_url = Some(url.into());
        self
    }

    pub fn shared_cross_origin(mut self, value: bool) -> Self {
        self.shared_cross_origin = value;
        self
    }

    pub fn embedder_debug_script(mut self, value: bool) -> Self {
        self.embedder_debug_script = value;
        self
    }

    pub fn opaque(mut self, value: bool) -> Self {
        self.opaque = value;
        self
    }

    /// The name to report, generating `VM<n>` when none was given.
    pub fn resolved_name(&self) -> Cow<'_, str> {
        if self.name.is_empty() {
            Cow::Owned(next_anonymous_name())
        } else {
            Cow::Borrowed(&self.name)
        }
    }
}

fn next_anonymous_name() -> String {
    format!("VM{}", NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed))
}
