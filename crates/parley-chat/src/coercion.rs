//! Coercion of raw generator output to declared parameter types.

use std::sync::LazyLock;

use parley_core::{ParamSpec, ParamType, ParamValue};
use regex::Regex;

use crate::error::ExtractionError;

/// Generator answers meaning "the utterance does not contain this value".
const ABSENT_MARKERS: &[&str] = &["none", "null", "n/a", "unknown", "nil", "-"];

const TRUE_WORDS: &[&str] = &["true", "yes", "y", "on", "1", "enable", "enabled"];
const FALSE_WORDS: &[&str] = &["false", "no", "n", "off", "0", "disable", "disabled"];

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("Invalid number regex"));

/// Strip whitespace, wrapping quotes, and trailing sentence punctuation.
fn clean(raw: &str) -> &str {
    let mut s = raw.trim();
    loop {
        let before = s;
        s = s.trim_end_matches(['.', '!', '?', ',', ';']).trim();
        for quote in ['"', '\'', '`'] {
            if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
                s = s[1..s.len() - 1].trim();
            }
        }
        if s == before {
            return s;
        }
    }
}

/// Coerce `raw` to the declared type of `param`.
///
/// `Ok(None)` means the value is absent. A present value that cannot be
/// read as the declared type is a `TypeCoercionFailed`.
pub fn coerce(raw: &str, param: &ParamSpec) -> Result<Option<ParamValue>, ExtractionError> {
    let value = clean(raw);
    if value.is_empty() || ABSENT_MARKERS.iter().any(|m| value.eq_ignore_ascii_case(m)) {
        return Ok(None);
    }

    let failed = || ExtractionError::TypeCoercionFailed {
        param: param.name.clone(),
        expected: param.param_type.to_string(),
        raw: value.to_string(),
    };

    let coerced = match &param.param_type {
        ParamType::String => Some(ParamValue::String(value.to_string())),
        ParamType::Integer => coerce_integer(value).map(ParamValue::Integer),
        ParamType::Float => coerce_float(value).map(ParamValue::Float),
        ParamType::Boolean => coerce_boolean(value).map(ParamValue::Boolean),
        ParamType::Enum(variants) => coerce_enum(value, variants).map(ParamValue::String),
    };
    coerced.map(Some).ok_or_else(failed)
}

fn coerce_integer(value: &str) -> Option<i64> {
    let compact = value.replace([',', '_'], "");
    if let Ok(i) = compact.parse::<i64>() {
        return Some(i);
    }
    if let Ok(f) = compact.parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return Some(f as i64);
        }
        return None;
    }
    // "10 minutes" -> 10, but "1.5 hours" is not an integer.
    single_number(value).and_then(|n| n.parse::<i64>().ok())
}

fn coerce_float(value: &str) -> Option<f64> {
    let compact = value.replace([',', '_'], "");
    if let Ok(f) = compact.parse::<f64>() {
        return f.is_finite().then_some(f);
    }
    single_number(value).and_then(|n| n.parse::<f64>().ok())
}

/// The only number embedded in `value`, if there is exactly one.
fn single_number(value: &str) -> Option<&str> {
    let mut found = NUMBER_RE.find_iter(value);
    let first = found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(first.as_str())
}

fn coerce_boolean(value: &str) -> Option<bool> {
    let lower = value.to_lowercase();
    if TRUE_WORDS.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_WORDS.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Exact case-insensitive match first, then a single variant named in the text.
fn coerce_enum(value: &str, variants: &[String]) -> Option<String> {
    if let Some(v) = variants.iter().find(|v| v.eq_ignore_ascii_case(value)) {
        return Some(v.clone());
    }
    let lower = value.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .collect();
    let mut mentioned = variants
        .iter()
        .filter(|v| words.contains(&v.to_lowercase().as_str()));
    match (mentioned.next(), mentioned.next()) {
        (Some(v), None) => Some(v.clone()),
        _ => None,
    }
}
