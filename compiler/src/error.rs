// error.rs — The single fatal signal for a compile job
//
// Every non-recoverable condition becomes an `AbortRun` and unwinds out of
// the job entry point with `?`. Warnings never use this type; they are
// `Diagnostic`s collected on the job.

use std::path::PathBuf;

use thiserror::Error;

use crate::diag::{codes, DiagCode, Diagnostic};

pub type Result<T> = std::result::Result<T, AbortRun>;

#[derive(Debug, Error)]
pub enum AbortRun {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("failed to parse equation '{text}' of {variable}: {message}")]
    Parse {
        variable: String,
        text: String,
        message: String,
    },

    #[error("Unresolved variable '{name}' referenced from {set}")]
    Unresolved { name: String, set: String },

    #[error("Unresolved connection endpoint '{endpoint}' for {set}.{alias}")]
    UnresolvedEndpoint {
        set: String,
        alias: String,
        endpoint: String,
    },

    #[error("Down-reference to population with more than one instance is ambiguous: {reference} in {set}")]
    AmbiguousDownReference { set: String, reference: String },

    #[error("Cyclic dependency between member variables: {0}")]
    MemberCycle(String),

    #[error("Cyclic dependency between temporary variables: {0}")]
    TemporaryCycle(String),

    #[error("Can't change $type between connection and non-connection.")]
    TypeChangeConnectivity { from: String, to: String },

    #[error("Unfulfilled connection binding during $type change.")]
    UnfulfilledBinding { from: String, to: String, alias: String },

    #[error("Exponent resolution did not converge for: {0}")]
    ExponentNonConvergence(String),

    #[error("File name must be a constant string: {function} in {variable}")]
    DynamicFileName { variable: String, function: String },

    #[error("Failed to compile:\n{stderr}")]
    Toolchain { command: String, stderr: String },

    #[error("pass {0} needs the model tree, which was not built")]
    PassOrder(&'static str),

    #[error("pass {0} reported errors")]
    PassFailed(&'static str),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl AbortRun {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AbortRun::Io {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> DiagCode {
        match self {
            AbortRun::Io { .. } => codes::E0501,
            AbortRun::Document(_) => codes::E0001,
            AbortRun::Parse { .. } => codes::E0002,
            AbortRun::Unresolved { .. } | AbortRun::UnresolvedEndpoint { .. } => codes::E0003,
            AbortRun::AmbiguousDownReference { .. } => codes::E0100,
            AbortRun::MemberCycle(_) | AbortRun::TemporaryCycle(_) => codes::E0101,
            AbortRun::TypeChangeConnectivity { .. } | AbortRun::UnfulfilledBinding { .. } => {
                codes::E0200
            }
            AbortRun::ExponentNonConvergence(_) => codes::E0300,
            AbortRun::DynamicFileName { .. } => codes::E0401,
            AbortRun::Toolchain { .. } | AbortRun::Launch { .. } => codes::E0500,
            AbortRun::PassOrder(_) | AbortRun::PassFailed(_) => codes::E0600,
        }
    }

    /// Error-level diagnostic for the job log.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let d = Diagnostic::error(self.to_string()).with_code(self.code());
        match self {
            AbortRun::TypeChangeConnectivity { from, to } => d.at(format!("{} -> {}", from, to)),
            AbortRun::UnfulfilledBinding { from, to, alias } => d
                .at(format!("{} -> {}", from, to))
                .with_cause(format!("binding '{}' has no counterpart", alias), None),
            AbortRun::DynamicFileName { variable, .. } => d.at(variable.clone()),
            AbortRun::Toolchain { command, .. } => d.with_cause(command.clone(), None),
            _ => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_change_message_is_verbatim() {
        let e = AbortRun::TypeChangeConnectivity {
            from: "A".into(),
            to: "C".into(),
        };
        assert_eq!(
            e.to_string(),
            "Can't change $type between connection and non-connection."
        );
        assert_eq!(e.code(), codes::E0200);
    }

    #[test]
    fn unfulfilled_binding_diagnostic_names_alias() {
        let e = AbortRun::UnfulfilledBinding {
            from: "C".into(),
            to: "D".into(),
            alias: "B".into(),
        };
        let d = e.to_diagnostic();
        assert_eq!(d.location.as_deref(), Some("C -> D"));
        assert!(d.cause_chain[0].message.contains("'B'"));
    }

    #[test]
    fn dynamic_file_name_is_located_at_its_variable() {
        let e = AbortRun::DynamicFileName {
            variable: "M.A.y".into(),
            function: "input".into(),
        };
        assert_eq!(e.code(), codes::E0401);
        assert_eq!(e.to_diagnostic().location.as_deref(), Some("M.A.y"));
    }

    #[test]
    fn toolchain_error_carries_stderr() {
        let e = AbortRun::Toolchain {
            command: "g++ -c model.cc".into(),
            stderr: "model.cc:1: error".into(),
        };
        assert!(e.to_string().starts_with("Failed to compile:\n"));
        assert!(e.to_string().contains("model.cc:1: error"));
    }
}
