// document.rs — Serialized model documents (input to a compile job)
//
// A model document is a JSON tree of parts that has already been flattened
// (inheritance merged, units resolved). Equations stay as text here and are
// parsed when the equation-set tree is built.
//
// Preconditions: none.
// Postconditions: `load` returns a structurally valid document or an error.
// Failure modes: I/O errors, malformed JSON.
// Side effects: reads the document file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AbortRun, Result};
use crate::model::Assignment;

/// One equation set (the root document is also a part).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartDoc {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VariableDoc>,
    #[serde(default)]
    pub parts: Vec<PartDoc>,
    /// Present iff this part is a connection type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connect: Vec<BindingDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixDoc>,
    /// Backend settings; only read from the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDoc {
    /// `x`, `x'`, `$n`, or a reference path such as `$up.x` / `A.y`.
    pub name: String,
    #[serde(default)]
    pub assignment: Assignment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub equations: Vec<EquationDoc>,
}

/// Either `"rhs"` / `"rhs @ condition"`, or the split form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EquationDoc {
    Text(String),
    Split {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingDoc {
    pub alias: String,
    pub endpoint: String,
}

/// Explicit sparse adjacency for a connection: row i, column j nonzero
/// connects instance i of `rows` with instance j of `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixDoc {
    pub file: String,
    pub rows: String,
    pub columns: String,
}

/// Backend settings carried by the document. Every field is optional;
/// unset fields fall back to `JobConfig` defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendDoc {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub numeric_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

pub fn from_str(text: &str) -> Result<PartDoc> {
    Ok(serde_json::from_str(text)?)
}

pub fn load(path: &Path) -> Result<(PartDoc, String)> {
    let text = std::fs::read_to_string(path).map_err(|e| AbortRun::io(path, e))?;
    let doc = from_str(&text)?;
    Ok((doc, text))
}
