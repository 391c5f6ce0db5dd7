use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::Result;
use crate::state::IterationState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub session_id: Uuid,
    pub target_kind: String,
    pub target_name: String,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed store of session states, one row per session.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                target_kind TEXT NOT NULL,
                target_name TEXT NOT NULL,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces the row for `state.session_id`.
    pub fn save(&self, state: &IterationState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let now = Utc::now().timestamp();
        self.lock().execute(
            "INSERT INTO checkpoints (session_id, target_kind, target_name, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![
                state.session_id.to_string(),
                state.target.kind().as_str(),
                state.target.name(),
                json,
                now
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, session_id: Uuid) -> Result<Option<IterationState>> {
        let conn = self.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT state FROM checkpoints WHERE session_id = ?1",
                [session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Most recently updated sessions first.
    pub fn list(&self, limit: usize) -> Result<Vec<CheckpointEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, target_kind, target_name, updated_at
             FROM checkpoints
             ORDER BY updated_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, target_kind, target_name, updated_at) = row?;
            let Ok(session_id) = Uuid::parse_str(&id) else {
                continue;
            };
            let updated_at = Utc.timestamp_opt(updated_at, 0).single().unwrap_or_default();
            entries.push(CheckpointEntry { session_id, target_kind, target_name, updated_at });
        }
        Ok(entries)
    }

    pub fn delete(&self, session_id: Uuid) -> Result<bool> {
        let deleted = self
            .lock()
            .execute("DELETE FROM checkpoints WHERE session_id = ?1", [session_id.to_string()])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Step;
    use crate::target::ResearchTarget;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn save_load_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(&dir.path().join("nested/checkpoints.sqlite")).unwrap();

        let mut state = IterationState::new(ResearchTarget::company("Acme"));
        state.accumulated.set("ceo", json!("Ada"));
        store.save(&state).unwrap();

        state.iteration = 1;
        state.record_step(Step::NoteReviewer);
        store.save(&state).unwrap();

        let loaded = store.load(state.session_id).unwrap().unwrap();
        assert_eq!(loaded.iteration, 1);
        assert_eq!(loaded.accumulated.get("ceo"), Some(&json!("Ada")));
        assert_eq!(loaded.steps, vec![Step::NoteReviewer]);

        let entries = store.list(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_kind, "company");
        assert_eq!(entries[0].target_name, "Acme");
    }

    #[test]
    fn load_and_delete_unknown_sessions() {
        let store = CheckpointStore::in_memory().unwrap();
        let state = IterationState::new(ResearchTarget::person("Jane Roe"));

        assert!(store.load(state.session_id).unwrap().is_none());
        store.save(&state).unwrap();
        assert!(store.delete(state.session_id).unwrap());
        assert!(!store.delete(state.session_id).unwrap());
        assert!(store.list(5).unwrap().is_empty());
    }
}
