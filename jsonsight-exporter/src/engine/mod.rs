//! Expression engines.
//!
//! Every descriptor expression (key, value, label, timestamp) is evaluated by
//! one of the engines in [`EngineKind`] against a parsed [`Document`]. Results
//! are text in [`Mode::Text`] and a JSON array in [`Mode::Collection`].

pub mod cel;
pub mod jsonpath;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use self::jsonpath::JsonPathTemplate;

/// Errors raised while evaluating an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("invalid JSON document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    #[error("failed to parse expression {expr:?}: {reason}")]
    Parse { expr: String, reason: String },

    #[error("{0} is not found")]
    NotFound(String),

    #[error("failed to evaluate {expr:?}: {reason}")]
    Eval { expr: String, reason: String },
}

impl ExprError {
    /// The expression ran but matched nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExprError::NotFound(_))
    }

    /// The expression itself is malformed, so every evaluation will fail.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, ExprError::Parse { .. })
    }
}

/// Selects the language a descriptor's expressions are written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EngineKind {
    #[default]
    JsonPath,
    Cel,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::JsonPath => "jsonpath",
            EngineKind::Cel => "cel",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonpath" => Ok(EngineKind::JsonPath),
            "cel" => Ok(EngineKind::Cel),
            other => Err(other.to_string()),
        }
    }
}

/// Output shape of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A single textual value (the last match).
    Text,
    /// Every match, serialized as a JSON array.
    Collection,
}

/// A parsed JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    value: Value,
}

impl Document {
    /// Parse raw response bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ExprError> {
        Ok(Self {
            value: serde_json::from_slice(bytes)?,
        })
    }

    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Compile `expr` with `engine`, discarding the result.
///
/// Used when building descriptors so that malformed expressions are rejected
/// with the configuration instead of on every probe.
pub fn check(engine: EngineKind, expr: &str) -> Result<(), ExprError> {
    match engine {
        EngineKind::JsonPath => JsonPathTemplate::parse(expr).map(drop),
        EngineKind::Cel => cel::compile(expr).map(drop),
    }
}

/// Evaluates expressions, keeping each compiled expression for reuse.
///
/// One evaluator lives for one probe. Expressions are compiled on first use,
/// so a descriptor iterating a large collection compiles its value path once.
#[derive(Default)]
pub struct Evaluator {
    jsonpath: HashMap<String, JsonPathTemplate>,
    cel: HashMap<String, cel_interpreter::Program>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `expr` against `doc`.
    ///
    /// JSONPath expressions without any `{...}` action are literal text and
    /// come back verbatim.
    pub fn evaluate(
        &mut self,
        engine: EngineKind,
        doc: &Document,
        expr: &str,
        mode: Mode,
    ) -> Result<String, ExprError> {
        match engine {
            EngineKind::JsonPath => {
                let template = match self.jsonpath.entry(expr.to_string()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(JsonPathTemplate::parse(expr)?),
                };
                match mode {
                    Mode::Text => template.render_text(doc.value()),
                    Mode::Collection => template.render_json(doc.value()),
                }
            }
            EngineKind::Cel => {
                let program = match self.cel.entry(expr.to_string()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(cel::compile(expr)?),
                };
                let result = cel::evaluate(program, expr, doc.value())?;
                Ok(match mode {
                    Mode::Text => cel::value_to_text(&result),
                    Mode::Collection => cel::value_to_json(&result).to_string(),
                })
            }
        }
    }
}
