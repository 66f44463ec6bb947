//! SQLite persistence for notes and cached directive results.

use crate::{FieldValue, Note, NoteMutation, QuillnotesError, Result};
use rusqlite::{Connection, Transaction};
use std::collections::HashMap;
use std::path::Path;

const SCHEMA_VERSION: &str = "1";

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.execute(
            "INSERT OR REPLACE INTO workspace_meta (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION],
        )?;
        log::info!("Created notes database at {}", path.as_ref().display());
        Ok(Self { conn })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Validate database structure
        let table_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='table'
             AND name IN ('notes', 'directive_results', 'workspace_meta')",
            [],
            |row| row.get(0),
        )?;

        if table_count != 3 {
            return Err(QuillnotesError::InvalidWorkspace(
                "Not a valid Quillnotes database".to_string(),
            ));
        }

        let storage = Self { conn };
        log::info!(
            "Opened notes database at {} (schema {})",
            path.as_ref().display(),
            storage.schema_version()?.as_deref().unwrap_or("unknown")
        );
        Ok(storage)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Returns the schema version recorded when the database was created.
    pub fn schema_version(&self) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM workspace_meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(version) => Ok(Some(version)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Inserts `note`, replacing any existing note with the same ID.
    pub fn save_note(&self, note: &Note) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO notes (id, title, content, created_at, modified_at, fields_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                note.id,
                note.title,
                note.content,
                note.created_at,
                note.modified_at,
                serde_json::to_string(&note.fields)?,
            ],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`QuillnotesError::NoteNotFound`] if no note has `note_id`.
    pub fn get_note(&self, note_id: &str) -> Result<Note> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, content, created_at, modified_at, fields_json
                 FROM notes WHERE id = ?1",
                [note_id],
                map_note_row,
            )
            .map_err(|e| not_found(e, note_id))?;
        note_from_row_tuple(row)
    }

    /// Returns every note, ordered by title.
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, created_at, modified_at, fields_json
             FROM notes ORDER BY title, id",
        )?;
        let rows = stmt
            .query_map([], map_note_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(note_from_row_tuple).collect()
    }

    /// Deletes a note together with its cached directive results.
    pub fn delete_note(&mut self, note_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM notes WHERE id = ?1", [note_id])?;
        if deleted == 0 {
            return Err(QuillnotesError::NoteNotFound(note_id.to_string()));
        }
        tx.execute("DELETE FROM directive_results WHERE note_id = ?1", [note_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Applies a batch of directive mutations in a single transaction.
    ///
    /// Either every mutation is applied or none is.
    ///
    /// # Errors
    ///
    /// Returns [`QuillnotesError::NoteNotFound`] if any mutation targets a
    /// missing note.
    pub fn apply_mutations(&mut self, mutations: &[NoteMutation]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        for mutation in mutations {
            apply_mutation(&tx, mutation, now)?;
        }
        tx.commit()?;
        log::info!("Applied {} note mutation(s)", mutations.len());
        Ok(())
    }
}

fn apply_mutation(tx: &Transaction<'_>, mutation: &NoteMutation, now: i64) -> Result<()> {
    let note_id = mutation.note_id();
    let updated = match mutation {
        NoteMutation::SetTitle { title, .. } => tx.execute(
            "UPDATE notes SET title = ?1, modified_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now, note_id],
        )?,
        NoteMutation::AppendContent { text, .. } => tx.execute(
            "UPDATE notes
             SET content = CASE WHEN content = '' THEN ?1 ELSE content || char(10) || ?1 END,
                 modified_at = ?2
             WHERE id = ?3",
            rusqlite::params![text, now, note_id],
        )?,
        NoteMutation::SetField { field, value, .. } => {
            let fields_json: String = tx
                .query_row("SELECT fields_json FROM notes WHERE id = ?1", [note_id], |row| row.get(0))
                .map_err(|e| not_found(e, note_id))?;
            let mut fields: HashMap<String, FieldValue> = serde_json::from_str(&fields_json)?;
            fields.insert(field.clone(), value.clone());
            tx.execute(
                "UPDATE notes SET fields_json = ?1, modified_at = ?2 WHERE id = ?3",
                rusqlite::params![serde_json::to_string(&fields)?, now, note_id],
            )?
        }
    };
    if updated == 0 {
        return Err(QuillnotesError::NoteNotFound(note_id.to_string()));
    }
    log::debug!("Set {} on note {note_id}", mutation.target());
    Ok(())
}

fn not_found(e: rusqlite::Error, note_id: &str) -> QuillnotesError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => QuillnotesError::NoteNotFound(note_id.to_string()),
        other => other.into(),
    }
}

type NoteRow = (String, String, String, i64, i64, String);

fn map_note_row(row: &rusqlite::Row) -> rusqlite::Result<NoteRow> {
    Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, i64>(3)?,
        row.get::<_, i64>(4)?,
        row.get::<_, String>(5)?,
    ))
}

/// Converts a raw 6-column tuple into a [`Note`], parsing `fields_json`.
fn note_from_row_tuple((id, title, content, created_at, modified_at, fields_json): NoteRow) -> Result<Note> {
    Ok(Note {
        id,
        title,
        content,
        created_at,
        modified_at,
        fields: serde_json::from_str(&fields_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn table_names(storage: &Storage) -> Vec<String> {
        storage
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    fn storage_with_note() -> (NamedTempFile, Storage) {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::create(temp.path()).unwrap();
        let mut note = Note::new("n1", "Groceries", "milk");
        note.fields.insert("count".to_string(), FieldValue::Number(2.0));
        storage.save_note(&note).unwrap();
        (temp, storage)
    }

    #[test]
    fn test_create_storage() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::create(temp.path()).unwrap();

        let tables = table_names(&storage);
        assert!(tables.contains(&"notes".to_string()));
        assert!(tables.contains(&"directive_results".to_string()));
        assert!(tables.contains(&"workspace_meta".to_string()));
        assert_eq!(storage.schema_version().unwrap().as_deref(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_open_existing_storage() {
        let temp = NamedTempFile::new().unwrap();

        // Create database first
        Storage::create(temp.path()).unwrap();

        let storage = Storage::open(temp.path()).unwrap();
        assert!(table_names(&storage).contains(&"directive_results".to_string()));
    }

    #[test]
    fn test_open_invalid_database() {
        let temp = NamedTempFile::new().unwrap();

        // Create empty file (not a valid Quillnotes DB)
        std::fs::write(temp.path(), "not a database").unwrap();

        let result = Storage::open(temp.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_open_foreign_database() {
        let temp = NamedTempFile::new().unwrap();
        {
            let conn = Connection::open(temp.path()).unwrap();
            conn.execute("CREATE TABLE notes (id TEXT PRIMARY KEY)", []).unwrap();
        }
        assert!(matches!(
            Storage::open(temp.path()),
            Err(QuillnotesError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn test_note_round_trip() {
        let (_temp, storage) = storage_with_note();
        let note = storage.get_note("n1").unwrap();
        assert_eq!(note.title, "Groceries");
        assert_eq!(note.fields.get("count"), Some(&FieldValue::Number(2.0)));
        assert_eq!(storage.list_notes().unwrap(), vec![note]);
        assert!(matches!(storage.get_note("missing"), Err(QuillnotesError::NoteNotFound(_))));
    }

    #[test]
    fn test_apply_mutations() {
        let (_temp, mut storage) = storage_with_note();
        storage
            .apply_mutations(&[
                NoteMutation::SetField {
                    note_id: "n1".to_string(),
                    field: "done".to_string(),
                    value: FieldValue::Boolean(true),
                },
                NoteMutation::SetTitle { note_id: "n1".to_string(), title: "Food".to_string() },
                NoteMutation::AppendContent { note_id: "n1".to_string(), text: "eggs".to_string() },
            ])
            .unwrap();

        let note = storage.get_note("n1").unwrap();
        assert_eq!(note.title, "Food");
        assert_eq!(note.content, "milk\neggs");
        assert_eq!(note.fields.get("done"), Some(&FieldValue::Boolean(true)));
        assert_eq!(note.fields.get("count"), Some(&FieldValue::Number(2.0)));
    }

    #[test]
    fn test_append_to_empty_content() {
        let (_temp, mut storage) = storage_with_note();
        storage.save_note(&Note::new("n2", "Empty", "")).unwrap();
        storage
            .apply_mutations(&[NoteMutation::AppendContent { note_id: "n2".to_string(), text: "first".to_string() }])
            .unwrap();
        assert_eq!(storage.get_note("n2").unwrap().content, "first");
    }

    #[test]
    fn test_apply_mutations_is_atomic() {
        let (_temp, mut storage) = storage_with_note();
        let result = storage.apply_mutations(&[
            NoteMutation::SetTitle { note_id: "n1".to_string(), title: "Changed".to_string() },
            NoteMutation::SetTitle { note_id: "ghost".to_string(), title: "Nope".to_string() },
        ]);
        assert!(matches!(result, Err(QuillnotesError::NoteNotFound(id)) if id == "ghost"));
        assert_eq!(storage.get_note("n1").unwrap().title, "Groceries");
    }

    #[test]
    fn test_delete_note() {
        let (_temp, mut storage) = storage_with_note();
        storage.delete_note("n1").unwrap();
        assert!(storage.list_notes().unwrap().is_empty());
        assert!(matches!(storage.delete_note("n1"), Err(QuillnotesError::NoteNotFound(_))));
    }
}
