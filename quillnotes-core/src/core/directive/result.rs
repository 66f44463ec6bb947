//! Persisted outcome of evaluating one directive.

use super::value::DslValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Advisory condition attached to an otherwise successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveWarningType {
    /// A lambda was created but never invoked.
    NoEffectLambda,
    /// A pattern was created but never used for matching.
    NoEffectPattern,
}

impl DirectiveWarningType {
    pub fn message(self) -> &'static str {
        match self {
            Self::NoEffectLambda => "lambda created but never invoked",
            Self::NoEffectPattern => "pattern created but never used for matching",
        }
    }

    /// Stable tag used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoEffectLambda => "noEffectLambda",
            Self::NoEffectPattern => "noEffectPattern",
        }
    }

    pub fn from_str_opt(tag: &str) -> Option<Self> {
        match tag {
            "noEffectLambda" => Some(Self::NoEffectLambda),
            "noEffectPattern" => Some(Self::NoEffectPattern),
            _ => None,
        }
    }
}

impl fmt::Display for DirectiveWarningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Cached result of a directive, keyed by the hash of its source text.
///
/// At most one of `error` and `warning` is set. A warning may accompany a
/// value. `collapsed` only affects rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveResult {
    /// The value in [`DslValue::serialize`] form.
    pub result: Option<Map<String, Value>>,
    /// Milliseconds since the Unix epoch.
    pub executed_at: Option<i64>,
    pub error: Option<String>,
    pub warning: Option<DirectiveWarningType>,
    #[serde(default)]
    pub collapsed: bool,
}

impl DirectiveResult {
    pub fn success(value: &DslValue) -> Self {
        Self {
            result: Some(value.serialize()),
            executed_at: Some(now_millis()),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            executed_at: Some(now_millis()),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn warning(value: Option<&DslValue>, warning: DirectiveWarningType) -> Self {
        Self {
            result: value.map(DslValue::serialize),
            executed_at: Some(now_millis()),
            warning: Some(warning),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.warning.is_none() && self.result.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_warning(&self) -> bool {
        self.warning.is_some()
    }

    /// Rebuilds the stored value, if there is one and it is well-formed.
    pub fn value(&self) -> Option<DslValue> {
        self.result.as_ref().and_then(|map| DslValue::deserialize(map).ok())
    }

    /// Text shown in place of the directive source.
    ///
    /// `fallback` is used when nothing has been computed yet.
    pub fn to_display_string(&self, fallback: &str) -> String {
        if let Some(error) = &self.error {
            return format!("Error: {error}");
        }
        if let Some(warning) = self.warning {
            return format!("Warning: {}", warning.message());
        }
        match &self.result {
            Some(map) => DslValue::deserialize(map)
                .map(|value| value.to_display_string())
                .unwrap_or_else(|_| "null".to_string()),
            None => fallback.to_string(),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
