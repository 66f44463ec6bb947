use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub fields: HashMap<String, FieldValue>,
}

impl Note {
    /// Creates an empty-fielded note with both timestamps set to `now`.
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            created_at: now,
            modified_at: now,
            fields: HashMap::new(),
        }
    }

    /// Creates a note with a freshly generated UUID.
    pub fn with_generated_id(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), title, content)
    }

    /// Returns the note's content split into lines, as indexed by directive position keys.
    pub fn lines(&self) -> Vec<&str> {
        self.content.split('\n').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_note() {
        let note = Note::new("test-id", "Test Note", "first\nsecond");

        assert_eq!(note.title, "Test Note");
        assert_eq!(note.lines(), vec!["first", "second"]);
        assert!(note.fields.is_empty());
        assert_eq!(note.created_at, note.modified_at);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Note::with_generated_id("A", "");
        let b = Note::with_generated_id("B", "");
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_field_value_text() {
        let value = FieldValue::Text("Hello".to_string());
        match value {
            FieldValue::Text(s) => assert_eq!(s, "Hello"),
            _ => panic!("Wrong variant"),
        }
    }
}
