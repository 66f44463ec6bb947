//! Runtime values of the directive language and their persisted form.
//!
//! Values persist as a string-keyed JSON object with a `"type"` tag:
//!
//! ```json
//! {"type": "number", "value": 4}
//! {"type": "list", "value": [{"type": "string", "value": "a"}]}
//! {"type": "note", "id": "n1", "title": "Groceries"}
//! ```
//!
//! Closures and patterns only exist within one evaluation; they serialize to
//! a descriptive object but refuse to deserialize.

use super::ast::Expression;
use super::pattern::PatternValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A runtime value produced by evaluating a directive.
#[derive(Debug, Clone, PartialEq)]
pub enum DslValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
    List(Vec<DslValue>),
    NoteRef(NoteRef),
    Lambda(Closure),
    Pattern(PatternValue),
}

/// A reference to a note, carrying the title seen at evaluation time for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRef {
    pub id: String,
    pub title: String,
}

/// A lambda captured during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    /// Identifies the evaluation of the lambda expression that created this closure.
    pub id: usize,
    pub params: Vec<String>,
    pub body: Arc<Expression>,
    /// Bindings of enclosing lambdas, captured by value.
    pub captured: BTreeMap<String, DslValue>,
}

/// Failure to rebuild a [`DslValue`] from its persisted map.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DslValueError {
    #[error("value has no type tag")]
    MissingType,

    #[error("unknown value type '{0}'")]
    UnknownType(String),

    #[error("{kind} value has a missing or malformed '{field}'")]
    InvalidField { kind: String, field: String },

    #[error("{0} values cannot be restored from storage")]
    NotPersistable(String),
}

impl DslValue {
    /// Short lowercase name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Null => "null",
            Self::List(_) => "list",
            Self::NoteRef(_) => "note",
            Self::Lambda(_) => "lambda",
            Self::Pattern(_) => "pattern",
        }
    }

    /// Approximate footprint: text bytes plus one per list item, recursively.
    ///
    /// Lambdas count their captured bindings, since invoking one copies them.
    pub fn size(&self) -> usize {
        match self {
            Self::Text(s) => s.len().max(1),
            Self::List(items) => items.iter().fold(1, |total, item| total.saturating_add(item.size())),
            Self::NoteRef(note) => note.id.len() + note.title.len(),
            Self::Lambda(closure) => closure
                .captured
                .values()
                .fold(1, |total, value| total.saturating_add(value.size())),
            Self::Number(_) | Self::Boolean(_) | Self::Null | Self::Pattern(_) => 1,
        }
    }

    /// Converts the value into its persisted map form.
    pub fn serialize(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(self.type_name()));
        match self {
            Self::Number(n) => {
                let value = serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::from(format_number(*n)));
                map.insert("value".into(), value);
            }
            Self::Text(s) => {
                map.insert("value".into(), Value::from(s.clone()));
            }
            Self::Boolean(b) => {
                map.insert("value".into(), Value::from(*b));
            }
            Self::Null => {}
            Self::List(items) => {
                let items = items.iter().map(|v| Value::Object(v.serialize())).collect();
                map.insert("value".into(), Value::Array(items));
            }
            Self::NoteRef(note) => {
                map.insert("id".into(), Value::from(note.id.clone()));
                map.insert("title".into(), Value::from(note.title.clone()));
            }
            Self::Lambda(closure) => {
                let params = closure.params.iter().map(|p| Value::from(p.clone())).collect();
                map.insert("params".into(), Value::Array(params));
            }
            Self::Pattern(pattern) => {
                map.insert("source".into(), Value::from(pattern.pattern.to_string()));
            }
        }
        map
    }

    /// Rebuilds a value from the output of [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns [`DslValueError`] for malformed maps, and
    /// [`DslValueError::NotPersistable`] for lambdas and patterns.
    pub fn deserialize(map: &Map<String, Value>) -> Result<Self, DslValueError> {
        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DslValueError::MissingType)?;
        let field = |name: &str| map.get(name).ok_or_else(|| invalid_field(kind, name));
        let invalid = |name: &str| invalid_field(kind, name);

        match kind {
            "number" => match field("value")? {
                Value::Number(n) => n.as_f64().map(Self::Number).ok_or_else(|| invalid("value")),
                Value::String(s) => parse_non_finite(s).map(Self::Number).ok_or_else(|| invalid("value")),
                _ => Err(invalid("value")),
            },
            "string" => field("value")?
                .as_str()
                .map(|s| Self::Text(s.to_string()))
                .ok_or_else(|| invalid("value")),
            "boolean" => field("value")?
                .as_bool()
                .map(Self::Boolean)
                .ok_or_else(|| invalid("value")),
            "null" => Ok(Self::Null),
            "list" => {
                let items = field("value")?.as_array().ok_or_else(|| invalid("value"))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_object()
                            .ok_or_else(|| invalid("value"))
                            .and_then(Self::deserialize)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::List)
            }
            "note" => {
                let id = field("id")?.as_str().ok_or_else(|| invalid("id"))?;
                let title = map.get("title").and_then(Value::as_str).unwrap_or_default();
                Ok(Self::NoteRef(NoteRef { id: id.to_string(), title: title.to_string() }))
            }
            "lambda" | "pattern" => Err(DslValueError::NotPersistable(kind.to_string())),
            other => Err(DslValueError::UnknownType(other.to_string())),
        }
    }

    /// Human-facing rendering used in place of the directive source.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::Boolean(b) => b.to_string(),
            Self::Null => "null".to_string(),
            Self::List(items) => items
                .iter()
                .map(|item| match item {
                    Self::List(_) => format!("({})", item.to_display_string()),
                    _ => item.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Self::NoteRef(note) if note.title.is_empty() => note.id.clone(),
            Self::NoteRef(note) => note.title.clone(),
            Self::Lambda(closure) => format!("<lambda({})>", closure.params.join(", ")),
            Self::Pattern(pattern) => format!("pattern({})", pattern.pattern),
        }
    }
}

/// Formats a number with at most ten decimal places and no trailing zeros.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let fixed = format!("{n:.10}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn invalid_field(kind: &str, field: &str) -> DslValueError {
    DslValueError::InvalidField {
        kind: kind.to_string(),
        field: field.to_string(),
    }
}

fn parse_non_finite(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &DslValue) -> DslValue {
        DslValue::deserialize(&value.serialize()).unwrap()
    }

    #[test]
    fn test_round_trip_persistable_values() {
        let values = vec![
            DslValue::Number(4.0),
            DslValue::Number(-0.125),
            DslValue::Number(f64::INFINITY),
            DslValue::Text("hello \"world\"".to_string()),
            DslValue::Boolean(false),
            DslValue::Null,
            DslValue::NoteRef(NoteRef { id: "n1".to_string(), title: "Groceries".to_string() }),
            DslValue::List(vec![
                DslValue::Number(1.0),
                DslValue::List(vec![DslValue::Text("nested".to_string())]),
                DslValue::Null,
            ]),
        ];
        for value in &values {
            assert_eq!(&round_trip(value), value);
        }
    }

    #[test]
    fn test_serialized_shape() {
        let map = DslValue::Number(4.0).serialize();
        assert_eq!(Value::Object(map), serde_json::json!({"type": "number", "value": 4.0}));

        let map = DslValue::Null.serialize();
        assert_eq!(Value::Object(map), serde_json::json!({"type": "null"}));
    }

    #[test]
    fn test_lambda_does_not_deserialize() {
        let closure = Closure {
            id: 0,
            params: vec!["x".to_string()],
            body: Arc::new(Expression::Variable("x".to_string())),
            captured: BTreeMap::new(),
        };
        let map = DslValue::Lambda(closure).serialize();
        assert_eq!(map.get("type"), Some(&Value::from("lambda")));
        assert_eq!(
            DslValue::deserialize(&map),
            Err(DslValueError::NotPersistable("lambda".to_string()))
        );
    }

    #[test]
    fn test_deserialize_malformed() {
        let empty = Map::new();
        assert_eq!(DslValue::deserialize(&empty), Err(DslValueError::MissingType));

        let json = serde_json::json!({"type": "number", "value": "four"});
        assert!(DslValue::deserialize(json.as_object().unwrap()).is_err());

        let json = serde_json::json!({"type": "date"});
        assert_eq!(
            DslValue::deserialize(json.as_object().unwrap()),
            Err(DslValueError::UnknownType("date".to_string()))
        );
    }

    #[test]
    fn test_number_display() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(2.50), "2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-3.25), "-3.25");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(DslValue::Text("plain".to_string()).to_display_string(), "plain");
        assert_eq!(DslValue::Boolean(true).to_display_string(), "true");
        assert_eq!(DslValue::Null.to_display_string(), "null");
        let list = DslValue::List(vec![
            DslValue::Number(1.0),
            DslValue::List(vec![DslValue::Number(2.0), DslValue::Number(3.0)]),
            DslValue::Text("x".to_string()),
        ]);
        assert_eq!(list.to_display_string(), "1, (2, 3), x");
        // Display is stable across calls.
        assert_eq!(list.to_display_string(), list.to_display_string());

        let untitled = DslValue::NoteRef(NoteRef { id: "n9".to_string(), title: String::new() });
        assert_eq!(untitled.to_display_string(), "n9");
    }

    #[test]
    fn test_size_counts_text_bytes_and_items() {
        assert_eq!(DslValue::Number(12.0).size(), 1);
        assert_eq!(DslValue::Text("héllo".to_string()).size(), 6);
        let nested = DslValue::List(vec![
            DslValue::Number(1.0),
            DslValue::List(vec![DslValue::Text("nested".to_string())]),
            DslValue::Null,
        ]);
        assert_eq!(nested.size(), 10);
    }
}
