use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Timestamp
// =============================================================================

/// Seconds since the Unix epoch (UTC).
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    /// Seconds elapsed between this timestamp and `now`. Never negative.
    pub fn elapsed_secs(&self, now: Timestamp) -> u64 {
        (now.0 - self.0).max(0) as u64
    }
}

// =============================================================================
// Parameter schema
// =============================================================================

/// Declared type of a command parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "variants", rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    /// Value must be one of the listed variants (matched case-insensitively).
    Enum(Vec<String>),
}

impl ParamType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ParamType::Integer | ParamType::Float)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Integer => write!(f, "integer"),
            ParamType::Float => write!(f, "float"),
            ParamType::Boolean => write!(f, "boolean"),
            ParamType::Enum(variants) => write!(f, "one of [{}]", variants.join(", ")),
        }
    }
}

/// A concrete parameter value after coercion.
///
/// Variant order matters for untagged deserialization: booleans and integers
/// must be tried before floats and strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this value is acceptable for the declared type.
    pub fn matches(&self, param_type: &ParamType) -> bool {
        match (self, param_type) {
            (ParamValue::String(_), ParamType::String) => true,
            (ParamValue::Integer(_), ParamType::Integer) => true,
            (ParamValue::Integer(_) | ParamValue::Float(_), ParamType::Float) => true,
            (ParamValue::Boolean(_), ParamType::Boolean) => true,
            (ParamValue::String(s), ParamType::Enum(variants)) => {
                variants.iter().any(|v| v.eq_ignore_ascii_case(s))
            }
            _ => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(b) => write!(f, "{}", b),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Integer(i)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Boolean(b)
    }
}

/// One slot in a command's ordered parameter schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    /// A required parameter with no default.
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    /// An optional parameter, falling back to `default` when not supplied.
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        default: Option<ParamValue>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Render a command signature, e.g. `set_reminder(message: string, priority?: one of [low, high] = low)`.
pub fn render_signature(name: &str, params: &[ParamSpec]) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|p| {
            let marker = if p.required { "" } else { "?" };
            match &p.default {
                Some(default) => format!("{}{}: {} = {}", p.name, marker, p.param_type, default),
                None => format!("{}{}: {}", p.name, marker, p.param_type),
            }
        })
        .collect();
    format!("{}({})", name, rendered.join(", "))
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Content hash of a command's name, signature, and description.
///
/// Used only as a cache-validity key for derived values such as embeddings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Hex-encoded SHA-256 of `name \n signature \n description`.
    pub fn compute(name: &str, params: &[ParamSpec], description: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        hasher.update(render_signature(name, params).as_bytes());
        hasher.update(b"\n");
        hasher.update(description.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
