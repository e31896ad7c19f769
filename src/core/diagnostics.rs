//! Leveled, non-halting diagnostics.
//!
//! The weaver never stops on a bad declaration or a call site that does not
//! match; it reports and moves on. Reports go to a [`DiagnosticSink`] supplied
//! by the caller and are mirrored to the `log` facade.

use std::fmt;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Warning,
    Error,
    Exception,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Exception => "exception",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    /// Messages are kept on a single line.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let message = message.replace("\r\n", " ").replace('\n', " ");
        Self { severity, message }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Receiver of diagnostics produced during a weaving run.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Collecting sink.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.entries.iter().filter(move |d| d.severity == severity)
    }

    /// True if any entry at error level or above was reported.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity >= Severity::Error)
    }
}

impl DiagnosticSink for Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }
}

/// Front end used by the weaver to emit diagnostics.
///
/// Debug entries always reach the `log` facade but are only forwarded to the
/// sink when `record_debug` is set.
pub struct Reporter<'s> {
    sink: &'s mut dyn DiagnosticSink,
    record_debug: bool,
}

impl<'s> Reporter<'s> {
    pub fn new(sink: &'s mut dyn DiagnosticSink, record_debug: bool) -> Self {
        Self { sink, record_debug }
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{}", message);
        if self.record_debug {
            self.sink.report(Diagnostic::new(Severity::Debug, message));
        }
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.sink.report(Diagnostic::new(Severity::Warning, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.sink.report(Diagnostic::new(Severity::Error, message));
    }

    /// Report a failure that aborted the run, including its source chain.
    pub fn exception(&mut self, error: &dyn std::error::Error) {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        log::error!("weaving aborted: {}", message);
        self.sink.report(Diagnostic::new(Severity::Exception, message));
    }
}
