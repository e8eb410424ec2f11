//! Progress and error reporting.
//!
//! The conversion core never prints. It hands `(severity, message)` pairs to a
//! [`Diagnostics`] sink and the caller decides where they go:
//!
//! | Sink | Used by |
//! |---|---|
//! | [`ChannelDiagnostics`] | the CLI, which drains events on a printer thread |
//! | `RecordingDiagnostics` (tests) | unit and integration tests |
//!
//! Every sink must be `Send + Sync`: sequence workers share one sink and emit
//! concurrently. Serialization happens inside the sink (the channel and its
//! printer thread), so lines are never interleaved.
//!
//! [`Reporter`] sits between the core and the sink and applies the verbose
//! flag: progress is dropped unless verbose, warnings and errors always pass.

use std::path::Path;
use std::sync::mpsc::Sender;

/// How loud a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Progress,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Progress => "Progress",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

/// Anything that accepts a message and a severity.
pub trait Diagnostics: Send + Sync {
    fn emit(&self, severity: Severity, message: &str);
}

/// A single emitted message, as sent over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub severity: Severity,
    pub message: String,
}

/// Sends every event to a receiver, typically a printer thread.
///
/// A dropped receiver is not an error: events are discarded.
pub struct ChannelDiagnostics {
    tx: Sender<DiagnosticEvent>,
}

impl ChannelDiagnostics {
    pub fn new(tx: Sender<DiagnosticEvent>) -> Self {
        Self { tx }
    }
}

impl Diagnostics for ChannelDiagnostics {
    fn emit(&self, severity: Severity, message: &str) {
        let _ = self.tx.send(DiagnosticEvent {
            severity,
            message: message.to_string(),
        });
    }
}

/// Format an event as display lines.
///
/// The first line carries the severity tag; continuation lines of a
/// multi-line message are indented under it.
///
/// ```text
/// [Error] Could not open file
///     Path: /shots/a.exr
///     failed to fill whole buffer
/// ```
pub fn format_event(event: &DiagnosticEvent) -> Vec<String> {
    let mut lines = event.message.lines();
    let first = lines.next().unwrap_or("");
    let mut out = vec![format!("[{}] {}", event.severity.label(), first)];
    out.extend(lines.map(|line| format!("    {}", line.trim_start())));
    out
}

/// A sink plus the verbose flag of the current request.
#[derive(Clone, Copy)]
pub struct Reporter<'a> {
    sink: &'a dyn Diagnostics,
    verbose: bool,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn Diagnostics, verbose: bool) -> Self {
        Self { sink, verbose }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn progress(&self, message: impl AsRef<str>) {
        if self.verbose {
            self.sink.emit(Severity::Progress, message.as_ref());
        }
    }

    /// Warn about `path` without failing the operation.
    pub fn warning_at(&self, message: &str, path: &Path, detail: Option<&str>) {
        self.sink
            .emit(Severity::Warning, &located(message, path, detail));
    }

    /// Report a failure concerning `path`, with an optional detail line
    /// (usually the underlying error).
    pub fn error(&self, message: &str, path: &Path, detail: Option<&str>) {
        self.sink.emit(Severity::Error, &located(message, path, detail));
    }
}

fn located(message: &str, path: &Path, detail: Option<&str>) -> String {
    let mut text = format!("{}\nPath: {}", message, path.display());
    if let Some(detail) = detail.filter(|d| !d.is_empty()) {
        text.push('\n');
        text.push_str(detail);
    }
    text
}
