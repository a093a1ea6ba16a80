//! Rendering of caught script exceptions into host-readable text.

use std::fmt::Write as _;

/// Where a caught exception was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Location {
    pub resource_name: String,
    pub line: usize,
    pub source_line: String,
    pub start_column: usize,
    pub end_column: usize,
}

/// Everything needed to describe a caught exception, detached from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExceptionReport {
    pub exception: String,
    pub location: Option<Location>,
    pub stack_trace: Option<String>,
}

impl ExceptionReport {
    /// Capture the exception held by `tc`.
    pub fn capture(tc: &mut v8::TryCatch<v8::HandleScope>) -> Self {
        let exception = match tc.exception() {
            Some(value) => value.to_rust_string_lossy(tc),
            None => String::new(),
        };
        let stack_trace = tc
            .stack_trace()
            .map(|value| value.to_rust_string_lossy(tc))
            .filter(|trace| !trace.is_empty());

        let location = tc.message().map(|message| {
            let resource_name = message
                .get_script_resource_name(tc)
                .map(|name| name.to_rust_string_lossy(tc))
                .unwrap_or_default();
            let line = message.get_line_number(tc).unwrap_or(0);
            let source_line = message
                .get_source_line(tc)
                .map(|line| line.to_rust_string_lossy(tc))
                .unwrap_or_default();
            Location {
                resource_name,
                line,
                source_line,
                start_column: message.get_start_column(),
                end_column: message.get_end_column(),
            }
        });

        Self {
            exception,
            location,
            stack_trace,
        }
    }

    /// Render as
    ///
    /// ```text
    /// name:line
    /// source line
    ///     ^^^^
    /// stack trace (or the exception when there is none)
    /// ```
    ///
    /// Without location information only the exception line is produced.
    pub fn render(&self) -> String {
        let Some(location) = &self.location else {
            return format!("{}\n", self.exception);
        };

        let mut out = String::new();
        let _ = writeln!(out, "{}:{}", location.resource_name, location.line);
        let _ = writeln!(out, "{}", location.source_line);
        out.push_str(&" ".repeat(location.start_column));
        out.push_str(&"^".repeat(location.end_column.saturating_sub(location.start_column)));
        out.push('\n');
        match &self.stack_trace {
            Some(trace) => out.push_str(trace),
            None => out.push_str(&self.exception),
        }
        out.push('\n');
        out
    }
}

/// Render the exception caught by `tc`.
pub(crate) fn render(tc: &mut v8::TryCatch<v8::HandleScope>) -> String {
    ExceptionReport::capture(tc).render()
}
