//! Numeric coercion of extracted values.
//!
//! Extraction always yields text. Sample values go through [`sanitize_value`],
//! epoch timestamps through [`sanitize_int_value`].

use thiserror::Error;

/// Textual rendering of a JSON `null` produced by the expression engines.
pub const NULL_SENTINEL: &str = "<nil>";

/// Raised when extracted text cannot be turned into a number.
#[derive(Debug, Error, PartialEq)]
pub enum SanitizeError {
    #[error("cannot parse {value:?} as float ({float_reason}) or bool")]
    NotNumeric { value: String, float_reason: String },

    #[error("cannot parse {value:?} as an epoch timestamp: {reason}")]
    NotInteger { value: String, reason: String },
}

/// Convert extracted text to a sample value.
///
/// Coercion order, first success wins:
/// 1. base-10 float
/// 2. case-insensitive `true` / `false` as 1.0 / 0.0
/// 3. [`NULL_SENTINEL`] as NaN
pub fn sanitize_value(raw: &str) -> Result<f64, SanitizeError> {
    let float_reason = match raw.parse::<f64>() {
        Ok(value) if value.is_finite() || is_infinity_literal(raw) => return Ok(value),
        Ok(_) => "value out of range".to_string(),
        Err(e) => e.to_string(),
    };

    if raw.eq_ignore_ascii_case("true") {
        return Ok(1.0);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(0.0);
    }

    if raw == NULL_SENTINEL {
        return Ok(f64::NAN);
    }

    Err(SanitizeError::NotNumeric {
        value: raw.to_string(),
        float_reason,
    })
}

/// `inf` or `infinity`, in any case, with an optional sign.
fn is_infinity_literal(raw: &str) -> bool {
    let unsigned = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

/// Convert extracted text to epoch milliseconds.
///
/// Fractional milliseconds are floored. Values outside the `i64` range, non-finite
/// values and the null sentinel are rejected so the caller can fall back to an
/// untimestamped sample.
pub fn sanitize_int_value(raw: &str) -> Result<i64, SanitizeError> {
    let value = raw.parse::<f64>().map_err(|e| SanitizeError::NotInteger {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !value.is_finite() {
        return Err(SanitizeError::NotInteger {
            value: raw.to_string(),
            reason: "not a finite number".to_string(),
        });
    }

    let floored = value.floor();
    if floored < i64::MIN as f64 || floored >= i64::MAX as f64 {
        return Err(SanitizeError::NotInteger {
            value: raw.to_string(),
            reason: "out of range for epoch milliseconds".to_string(),
        });
    }

    Ok(floored as i64)
}
