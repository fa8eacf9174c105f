//! Closed-form evaluator for buffer distances.
//!
//! Accepted forms:
//!
//! ```text
//! expr := number
//!       | number '*' ident
//!       | ident
//! ```
//!
//! Identifiers are resolved against the branch's math context. Nothing else
//! is evaluated.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unsupported expression '{0}'")]
    Unsupported(String),
}

/// Variables available to an expression, keyed by identifier.
pub type MathContext = HashMap<String, f64>;

/// Evaluate a buffer value.
///
/// Numbers pass through. Strings are parsed with the grammar above.
pub fn evaluate(value: &Value, context: &MathContext) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExprError::Unsupported(n.to_string())),
        Value::String(s) => evaluate_str(s, context),
        other => Err(ExprError::Unsupported(other.to_string())),
    }
}

pub fn evaluate_str(expression: &str, context: &MathContext) -> Result<f64, ExprError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ExprError::Empty);
    }

    if let Some((lhs, rhs)) = expression.split_once('*') {
        let factor = parse_number(lhs.trim())
            .ok_or_else(|| ExprError::Unsupported(expression.to_string()))?;
        let ident = rhs.trim();
        if !is_identifier(ident) {
            return Err(ExprError::Unsupported(expression.to_string()));
        }
        return lookup(ident, context).map(|v| factor * v);
    }

    if let Some(n) = parse_number(expression) {
        return Ok(n);
    }
    if is_identifier(expression) {
        return lookup(expression, context);
    }
    Err(ExprError::Unsupported(expression.to_string()))
}

fn lookup(ident: &str, context: &MathContext) -> Result<f64, ExprError> {
    context
        .get(ident)
        .copied()
        .ok_or_else(|| ExprError::UnknownVariable(ident.to_string()))
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Build a math context from branch properties.
///
/// Values may be numbers or numeric strings; anything else is ignored.
pub fn math_context<'a>(
    properties: impl IntoIterator<Item = (&'a String, &'a Value)>,
    keys: &[&str],
) -> MathContext {
    properties
        .into_iter()
        .filter(|(k, _)| keys.contains(&k.as_str()))
        .filter_map(|(k, v)| {
            let n = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }?;
            Some((k.clone(), n))
        })
        .collect()
}
