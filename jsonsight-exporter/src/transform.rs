//! jq transformations applied to a document before extraction.

use std::fmt;
use std::str::FromStr;

use jaq_interpret::{Ctx, Filter, FilterT, ParseCtx, RcIter, Val};
use serde_json::Value;
use thiserror::Error;

/// Transformation errors.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unknown transformation type {0:?}")]
    UnknownType(String),

    #[error("failed to compile jq query {query:?}: {reason}")]
    Compile { query: String, reason: String },

    #[error("jq query {query:?} failed: {reason}")]
    Run { query: String, reason: String },
}

/// Supported transformation languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Jq,
}

impl FromStr for TransformKind {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jq" => Ok(TransformKind::Jq),
            _ => Err(TransformError::UnknownType(s.to_string())),
        }
    }
}

/// A compiled jq filter.
pub struct JqTransform {
    query: String,
    filter: Filter,
}

impl fmt::Debug for JqTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JqTransform")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl JqTransform {
    /// Compile a query against the jq core and standard library definitions.
    pub fn compile(query: &str) -> Result<Self, TransformError> {
        let mut defs = ParseCtx::new(Vec::new());
        defs.insert_natives(jaq_core::core());
        defs.insert_defs(jaq_std::std());

        let (main, errs) = jaq_parse::parse(query, jaq_parse::main());
        if !errs.is_empty() {
            return Err(TransformError::Compile {
                query: query.to_string(),
                reason: format!("{:?}", errs),
            });
        }
        let main = main.ok_or_else(|| TransformError::Compile {
            query: query.to_string(),
            reason: "empty query".to_string(),
        })?;

        let filter = defs.compile(main);
        if !defs.errs.is_empty() {
            return Err(TransformError::Compile {
                query: query.to_string(),
                reason: format!("{} undefined symbol(s)", defs.errs.len()),
            });
        }

        Ok(Self {
            query: query.to_string(),
            filter,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Run the filter and gather every output into a JSON array.
    pub fn apply(&self, input: &Value) -> Result<Value, TransformError> {
        let inputs = RcIter::new(core::iter::empty());
        let outputs = self
            .filter
            .run((Ctx::new([], &inputs), Val::from(input.clone())));

        let mut results = Vec::new();
        for output in outputs {
            let val = output.map_err(|e| TransformError::Run {
                query: self.query.clone(),
                reason: e.to_string(),
            })?;
            results.push(Value::from(val));
        }
        Ok(Value::Array(results))
    }
}
