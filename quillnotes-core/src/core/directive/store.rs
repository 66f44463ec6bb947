//! Content-addressed storage of directive results.
//!
//! Results are keyed by `(note_id, hash)` where the hash comes from
//! [`hash_directive`]. [`ResultCache`] sits on top of a store and makes sure
//! concurrent renders of the same directive compute it only once.

use super::finder::{directive_key, find_directives, hash_directive, DirectiveFinder};
use super::result::{DirectiveResult, DirectiveWarningType};
use crate::{Note, Result, Storage};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Key-value persistence for [`DirectiveResult`]s.
pub trait DirectiveResultStore: Send + Sync {
    fn get(&self, note_id: &str, hash: &str) -> Result<Option<DirectiveResult>>;

    /// Stores `result`, replacing any previous entry.
    fn put(&self, note_id: &str, hash: &str, result: &DirectiveResult) -> Result<()>;

    /// Returns whether an entry was removed.
    fn remove(&self, note_id: &str, hash: &str) -> Result<bool>;

    /// Removes every result of one note and returns how many there were.
    fn clear_note(&self, note_id: &str) -> Result<usize>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: Mutex<HashMap<(String, String), DirectiveResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DirectiveResultStore for InMemoryResultStore {
    fn get(&self, note_id: &str, hash: &str) -> Result<Option<DirectiveResult>> {
        Ok(lock(&self.results).get(&(note_id.to_string(), hash.to_string())).cloned())
    }

    fn put(&self, note_id: &str, hash: &str, result: &DirectiveResult) -> Result<()> {
        lock(&self.results).insert((note_id.to_string(), hash.to_string()), result.clone());
        Ok(())
    }

    fn remove(&self, note_id: &str, hash: &str) -> Result<bool> {
        Ok(lock(&self.results).remove(&(note_id.to_string(), hash.to_string())).is_some())
    }

    fn clear_note(&self, note_id: &str) -> Result<usize> {
        let mut results = lock(&self.results);
        let before = results.len();
        results.retain(|(id, _), _| id != note_id);
        Ok(before - results.len())
    }
}

/// A store backed by the `directive_results` table of a [`Storage`].
pub struct SqliteResultStore {
    storage: Mutex<Storage>,
}

type ResultRow = (Option<String>, Option<i64>, Option<String>, Option<String>, i64);

impl SqliteResultStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Mutex::new(storage),
        }
    }

    /// Locks the underlying storage, e.g. to apply mutations.
    pub fn storage(&self) -> MutexGuard<'_, Storage> {
        lock(&self.storage)
    }

    pub fn into_inner(self) -> Storage {
        self.storage.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DirectiveResultStore for SqliteResultStore {
    fn get(&self, note_id: &str, hash: &str) -> Result<Option<DirectiveResult>> {
        let storage = self.storage();
        let row = storage.connection().query_row(
            "SELECT result_json, executed_at, error, warning, collapsed
             FROM directive_results WHERE note_id = ?1 AND content_hash = ?2",
            [note_id, hash],
            |row| -> rusqlite::Result<ResultRow> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            },
        );
        let (result_json, executed_at, error, warning, collapsed) = match row {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let result = result_json.map(|json| serde_json::from_str(&json)).transpose()?;
        Ok(Some(DirectiveResult {
            result,
            executed_at,
            error,
            warning: warning.as_deref().and_then(DirectiveWarningType::from_str_opt),
            collapsed: collapsed != 0,
        }))
    }

    fn put(&self, note_id: &str, hash: &str, result: &DirectiveResult) -> Result<()> {
        let result_json = result.result.as_ref().map(serde_json::to_string).transpose()?;
        self.storage().connection().execute(
            "INSERT OR REPLACE INTO directive_results
                 (note_id, content_hash, result_json, executed_at, error, warning, collapsed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                note_id,
                hash,
                result_json,
                result.executed_at,
                result.error,
                result.warning.map(DirectiveWarningType::as_str),
                result.collapsed,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, note_id: &str, hash: &str) -> Result<bool> {
        let removed = self.storage().connection().execute(
            "DELETE FROM directive_results WHERE note_id = ?1 AND content_hash = ?2",
            [note_id, hash],
        )?;
        Ok(removed > 0)
    }

    fn clear_note(&self, note_id: &str) -> Result<usize> {
        let removed = self
            .storage()
            .connection()
            .execute("DELETE FROM directive_results WHERE note_id = ?1", [note_id])?;
        Ok(removed)
    }
}

/// Read-through cache over a [`DirectiveResultStore`] with at most one
/// computation in flight per `(note_id, hash)`.
///
/// A caller that finds the key being computed waits for that computation and
/// then reads its stored result instead of computing again.
pub struct ResultCache<S> {
    store: S,
    in_flight: Mutex<HashSet<(String, String)>>,
    finished: Condvar,
}

/// Releases an in-flight claim when dropped, including on panic.
struct Claim<'c> {
    in_flight: &'c Mutex<HashSet<(String, String)>>,
    finished: &'c Condvar,
    key: (String, String),
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.key);
        self.finished.notify_all();
    }
}

impl<S: DirectiveResultStore> ResultCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
            finished: Condvar::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn claim(&self, note_id: &str, hash: &str) -> Claim<'_> {
        let key = (note_id.to_string(), hash.to_string());
        let mut in_flight = lock(&self.in_flight);
        while in_flight.contains(&key) {
            in_flight = self.finished.wait(in_flight).unwrap_or_else(PoisonError::into_inner);
        }
        in_flight.insert(key.clone());
        Claim {
            in_flight: &self.in_flight,
            finished: &self.finished,
            key,
        }
    }

    /// Returns the stored result, computing and storing it first if absent.
    pub fn get_or_compute<F>(&self, note_id: &str, hash: &str, compute: F) -> Result<DirectiveResult>
    where
        F: FnOnce() -> DirectiveResult,
    {
        let _claim = self.claim(note_id, hash);
        if let Some(existing) = self.store.get(note_id, hash)? {
            return Ok(existing);
        }
        log::debug!("Computing directive {hash} for note {note_id}");
        let result = compute();
        self.store.put(note_id, hash, &result)?;
        Ok(result)
    }

    /// Computes and stores a result unconditionally, keeping the display flag.
    pub fn recompute<F>(&self, note_id: &str, hash: &str, compute: F) -> Result<DirectiveResult>
    where
        F: FnOnce() -> DirectiveResult,
    {
        let _claim = self.claim(note_id, hash);
        let collapsed = self.store.get(note_id, hash)?.is_some_and(|r| r.collapsed);
        let result = DirectiveResult {
            collapsed,
            ..compute()
        };
        self.store.put(note_id, hash, &result)?;
        Ok(result)
    }

    /// Sets the display-only `collapsed` flag. Returns `false` if there is no
    /// stored result to update.
    pub fn set_collapsed(&self, note_id: &str, hash: &str, collapsed: bool) -> Result<bool> {
        let _claim = self.claim(note_id, hash);
        let Some(mut result) = self.store.get(note_id, hash)? else {
            return Ok(false);
        };
        result.collapsed = collapsed;
        self.store.put(note_id, hash, &result)?;
        Ok(true)
    }

    /// Stored results for the directives on one line, keyed by
    /// [`directive_key`]. Directives without a stored result are omitted.
    pub fn results_for_line(&self, note_id: &str, line: &str, line_index: usize) -> Result<HashMap<String, DirectiveResult>> {
        let mut results = HashMap::new();
        for found in find_directives(line) {
            if let Some(result) = self.store.get(note_id, &hash_directive(&found.source_text))? {
                results.insert(directive_key(line_index, found.start_offset), result);
            }
        }
        Ok(results)
    }

    /// Evaluates any uncached directives of `note` on the automatic path and
    /// returns the results for every line, keyed by [`directive_key`].
    pub fn resolve_note(
        &self,
        finder: &DirectiveFinder,
        note: &Note,
        notes: Option<&[Note]>,
    ) -> Result<HashMap<String, DirectiveResult>> {
        let mut results = HashMap::new();
        for (line_index, line) in note.lines().into_iter().enumerate() {
            for found in find_directives(line) {
                let hash = hash_directive(&found.source_text);
                let result = self.get_or_compute(&note.id, &hash, || {
                    finder.execute_directive(&found.source_text, notes, Some(note), None).result
                })?;
                results.insert(directive_key(line_index, found.start_offset), result);
            }
        }
        Ok(results)
    }
}
