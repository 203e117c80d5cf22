// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler passes.
// Warnings are collected and compilation continues; errors accompany an
// `AbortRun` and end the job.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0001`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Errors
    pub const E0001: DiagCode = DiagCode("E0001"); // model document unreadable
    pub const E0002: DiagCode = DiagCode("E0002"); // equation text does not parse
    pub const E0003: DiagCode = DiagCode("E0003"); // unresolved name
    pub const E0100: DiagCode = DiagCode("E0100"); // ambiguous down-reference
    pub const E0101: DiagCode = DiagCode("E0101"); // cyclic dependency
    pub const E0200: DiagCode = DiagCode("E0200"); // illegal $type conversion
    pub const E0300: DiagCode = DiagCode("E0300"); // exponent resolution did not converge
    pub const E0401: DiagCode = DiagCode("E0401"); // non-constant file name
    pub const E0500: DiagCode = DiagCode("E0500"); // toolchain failure
    pub const E0501: DiagCode = DiagCode("E0501"); // I/O failure
    pub const E0600: DiagCode = DiagCode("E0600"); // pass ran out of order

    // Warnings
    pub const W0001: DiagCode = DiagCode("W0001"); // numeric type fallback
    pub const W0002: DiagCode = DiagCode("W0002"); // unknown integrator
    pub const W0003: DiagCode = DiagCode("W0003"); // unknown event mode
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a chain explaining how a failure was reached.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub location: Option<String>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Dotted model path the diagnostic is about (`Model.A.x`), if any.
    pub location: Option<String>,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, location, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location: None,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, location: Option<String>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            location,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(location) = &self.location {
            write!(f, "\n  --> {}", location)?;
        }
        for cause in &self.cause_chain {
            match &cause.location {
                Some(loc) => write!(f, "\n  because: {} ({})", cause.message, loc)?,
                None => write!(f, "\n  because: {}", cause.message)?,
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
