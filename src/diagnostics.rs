//! Diagnostics raised by minifiers and buffered until the builder flushes them.
//!
//! Minifier threads only ever append through a [`DiagnosticReporter`]; the
//! builder drains the [`DiagnosticSink`] after the worker has joined and
//! turns each entry into a workspace marker on its own thread.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::resource::ResourcePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem found in a source file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: ResourcePath,
    pub message: String,
    /// 1-based; 1 when the minifier did not know
    pub line: u32,
    pub severity: Severity,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.file, self.line, self.severity, self.message
        )
    }
}

fn lock(entries: &Mutex<Vec<Diagnostic>>) -> MutexGuard<'_, Vec<Diagnostic>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Buffer owned by the builder
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append handle for a worker, bound to the file it reports on
    pub fn reporter(&self, file: ResourcePath) -> DiagnosticReporter {
        DiagnosticReporter {
            file,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Take everything recorded so far
    pub fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *lock(&self.entries))
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cloneable append handle handed to minifier threads
#[derive(Debug, Clone)]
pub struct DiagnosticReporter {
    file: ResourcePath,
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticReporter {
    /// Record a diagnostic; a line of 0 (unknown) is reported as line 1
    pub fn report(&self, severity: Severity, message: impl Into<String>, line: u32) {
        lock(&self.entries).push(Diagnostic {
            file: self.file.clone(),
            message: message.into(),
            line: line.max(1),
            severity,
        });
    }

    pub fn error(&self, message: impl Into<String>, line: u32) {
        self.report(Severity::Error, message, line);
    }

    pub fn warning(&self, message: impl Into<String>, line: u32) {
        self.report(Severity::Warning, message, line);
    }

    pub fn file(&self) -> &ResourcePath {
        &self.file
    }
}
