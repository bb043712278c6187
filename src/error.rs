//! Structured, accumulable diagnostics.
//!
//! Fatal, single-shot failures (bad paths, malformed ELF) still flow as
//! `anyhow::Result` with `.context(...)` chains, matching the rest of the
//! crate. The categories from the spec that are meant to be *accumulated*
//! across the whole link (undefined references, multiple definitions,
//! policy warnings) are collected here instead, so that the driver can
//! report them together in deterministic order at the end of the run.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

/// One diagnostic raised during the link. `Severity` determines whether its
/// presence aborts the pipeline.
#[derive(Debug, Error)]
pub enum Diagnostic {
    #[error("undefined reference to `{symbol}`, referenced from {file}")]
    UndefinedReference { symbol: String, file: String },

    #[error("multiple definition of `{symbol}`: first defined in {first}, also defined in {second}")]
    MultipleDefinition {
        symbol: String,
        first: String,
        second: String,
    },

    #[error("version mismatch for `{symbol}`: requested `{requested}`, found `{found}`")]
    VersionMismatch {
        symbol: String,
        requested: String,
        found: String,
    },

    #[error("relocation {kind} against `{symbol}` in {file}:{section}+{offset:#x} overflows its field after thunk insertion")]
    RelocationOverflow {
        kind: &'static str,
        symbol: String,
        file: String,
        section: String,
        offset: u64,
    },

    #[error("unsupported relocation {kind} against `{symbol}` in {file}:{section}+{offset:#x}")]
    UnsupportedRelocation {
        kind: String,
        symbol: String,
        file: String,
        section: String,
        offset: u64,
    },

    #[error("{0}: text relocation in read-only section; rerun with -z notext to silence")]
    TextRelocation(String),

    #[error("missing build-id note (pass --build-id to silence)")]
    MissingBuildId,

    #[error("executable stack requested or inferred for {0} (pass -z noexecstack to silence)")]
    ExecutableStack(String),
}

/// Severity classification used to decide whether a [`Diagnostic`] aborts
/// the link (kind 2-3 in the error handling design are always fatal; kind 4
/// policy warnings are fatal only when promoted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Fatal,
}

impl Diagnostic {
    /// Default severity absent any `--fatal-warnings`/`-z defs` promotion.
    pub fn default_severity(&self) -> Severity {
        match self {
            Diagnostic::UndefinedReference { .. }
            | Diagnostic::MultipleDefinition { .. }
            | Diagnostic::VersionMismatch { .. }
            | Diagnostic::RelocationOverflow { .. }
            | Diagnostic::UnsupportedRelocation { .. } => Severity::Fatal,
            Diagnostic::TextRelocation(_)
            | Diagnostic::MissingBuildId
            | Diagnostic::ExecutableStack(_) => Severity::Warning,
        }
    }
}

/// A sharded, mutex-protected diagnostic collector. One shard per rayon
/// worker avoids contention during the parallel passes of §5; shards are
/// drained and sorted into deterministic order at each stage barrier.
pub struct DiagnosticBag {
    shards: Vec<Mutex<Vec<(Diagnostic, Severity)>>>,
}

impl DiagnosticBag {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn shard_for(&self) -> usize {
        // rayon's current thread index, falling back to shard 0 outside a pool.
        rayon::current_thread_index().unwrap_or(0) % self.shards.len()
    }

    /// Push a diagnostic using its default severity, possibly promoted to
    /// fatal by `fatal_warnings`.
    pub fn push(&self, diag: Diagnostic, fatal_warnings: bool) {
        let mut severity = diag.default_severity();
        if fatal_warnings && severity == Severity::Warning {
            severity = Severity::Fatal;
        }
        let idx = self.shard_for();
        self.shards[idx].lock().unwrap().push((diag, severity));
    }

    /// True if any accumulated diagnostic is fatal.
    pub fn has_fatal(&self) -> bool {
        self.shards
            .iter()
            .any(|s| s.lock().unwrap().iter().any(|(_, sev)| *sev == Severity::Fatal))
    }

    /// Drain all shards, merging into one `Vec` without a stable order yet.
    pub fn drain_all(&self) -> Vec<(Diagnostic, Severity)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.append(&mut shard.lock().unwrap());
        }
        out
    }
}

impl fmt::Debug for DiagnosticBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiagnosticBag({} shards)", self.shards.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_promoted_to_fatal() {
        let bag = DiagnosticBag::new(1);
        bag.push(Diagnostic::MissingBuildId, true);
        assert!(bag.has_fatal());
    }

    #[test]
    fn warning_not_fatal_by_default() {
        let bag = DiagnosticBag::new(1);
        bag.push(Diagnostic::MissingBuildId, false);
        assert!(!bag.has_fatal());
    }

    #[test]
    fn resolution_errors_are_always_fatal() {
        let bag = DiagnosticBag::new(1);
        bag.push(
            Diagnostic::UndefinedReference {
                symbol: "foo".into(),
                file: "a.o".into(),
            },
            false,
        );
        assert!(bag.has_fatal());
    }
}
