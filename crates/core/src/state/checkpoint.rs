//! # Checkpoints
//!
//! Durable blackboard snapshots, one per completed stage. Versions are
//! monotonically increasing per session and assigned inside the insert
//! transaction, so two commits can never share a version.

use super::blackboard::Blackboard;
use super::db::ScholarDb;
use crate::workflow::stage::Stage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A committed snapshot of a session's blackboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub version: u64,
    /// Stage the pipeline will run next when resumed from here
    pub stage: Stage,
    pub blackboard: Blackboard,
    pub pending_interrupt: bool,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint header without the blackboard payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub version: u64,
    pub stage: Stage,
    pub pending_interrupt: bool,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint store backed by the `checkpoints` table
#[derive(Clone)]
pub struct CheckpointStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl CheckpointStore {
    pub fn new(db: &ScholarDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Write the next version for a session
    pub fn commit(
        &self,
        session_id: &str,
        stage: Stage,
        blackboard: &Blackboard,
        pending_interrupt: bool,
    ) -> Result<Checkpoint> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let payload = serde_json::to_string(blackboard)?;
        let created_at = Utc::now();

        let tx = conn.transaction()?;
        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM checkpoints WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        tx.execute(
            r#"
            INSERT INTO checkpoints (session_id, version, stage, blackboard, pending_interrupt, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session_id,
                version,
                stage.as_str(),
                payload,
                pending_interrupt as i32,
                created_at.to_rfc3339(),
            ],
        )
        .context("Failed to save checkpoint")?;
        tx.commit()?;

        tracing::debug!(session_id, version, stage = %stage, pending_interrupt, "Checkpoint committed");

        Ok(Checkpoint {
            session_id: session_id.to_string(),
            version: version as u64,
            stage,
            blackboard: blackboard.clone(),
            pending_interrupt,
            created_at,
        })
    }

    /// Most recent checkpoint of a session
    pub fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row = conn
            .query_row(
                r#"
                SELECT session_id, version, stage, blackboard, pending_interrupt, created_at
                FROM checkpoints WHERE session_id = ?1
                ORDER BY version DESC LIMIT 1
                "#,
                params![session_id],
                Self::row_to_checkpoint,
            )
            .optional()
            .context("Failed to load latest checkpoint")?;

        row.transpose()
    }

    /// A specific version
    pub fn load(&self, session_id: &str, version: u64) -> Result<Checkpoint> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            r#"
            SELECT session_id, version, stage, blackboard, pending_interrupt, created_at
            FROM checkpoints WHERE session_id = ?1 AND version = ?2
            "#,
            params![session_id, version as i64],
            Self::row_to_checkpoint,
        )
        .with_context(|| format!("Checkpoint {} v{} not found", session_id, version))?
    }

    /// Latest version number, 0 when nothing is committed
    pub fn latest_version(&self, session_id: &str) -> Result<u64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM checkpoints WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(version as u64)
    }

    /// Checkpoint history of a session, oldest first
    pub fn history(&self, session_id: &str) -> Result<Vec<CheckpointInfo>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT version, stage, pending_interrupt, created_at
            FROM checkpoints WHERE session_id = ?1
            ORDER BY version ASC
            "#,
        )?;

        let infos = stmt
            .query_map(params![session_id], |row| {
                let version: i64 = row.get(0)?;
                let stage: String = row.get(1)?;
                let pending: i32 = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok(CheckpointInfo {
                    version: version as u64,
                    stage: Stage::parse(&stage).unwrap_or(Stage::Failed),
                    pending_interrupt: pending != 0,
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list checkpoints")?;

        Ok(infos)
    }

    /// Decoding the blackboard happens outside rusqlite so a corrupt payload
    /// surfaces as an error instead of an empty board.
    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<Result<Checkpoint>> {
        let session_id: String = row.get(0)?;
        let version: i64 = row.get(1)?;
        let stage: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let pending: i32 = row.get(4)?;
        let created_at: String = row.get(5)?;

        Ok((|| -> Result<Checkpoint> {
            let stage = Stage::parse(&stage)
                .ok_or_else(|| anyhow::anyhow!("Unknown stage '{}' in checkpoint", stage))?;
            let blackboard: Blackboard = serde_json::from_str(&payload)
                .with_context(|| format!("Corrupt blackboard in {} v{}", session_id, version))?;
            Ok(Checkpoint {
                session_id,
                version: version as u64,
                stage,
                blackboard,
                pending_interrupt: pending != 0,
                created_at: parse_timestamp(&created_at),
            })
        })())
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::documents::Language;
    use crate::state::session::SessionStore;

    fn setup() -> (ScholarDb, String) {
        let db = ScholarDb::open_in_memory().unwrap();
        let session = SessionStore::new(&db)
            .create("graph neural networks", Language::En)
            .unwrap();
        (db, session.id)
    }

    #[test]
    fn test_versions_are_monotonic() {
        let (db, sid) = setup();
        let store = CheckpointStore::new(&db);
        let board = Blackboard::new("q", Language::En);

        let v1 = store.commit(&sid, Stage::Planning, &board, false).unwrap();
        let v2 = store.commit(&sid, Stage::Retrieval, &board, false).unwrap();
        let v3 = store.commit(&sid, Stage::Interrupted, &board, true).unwrap();

        assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
        assert_eq!(store.latest_version(&sid).unwrap(), 3);
    }

    #[test]
    fn test_latest_round_trips_blackboard() {
        let (db, sid) = setup();
        let store = CheckpointStore::new(&db);
        let mut board = Blackboard::new("q", Language::Zh);
        board.keywords = vec!["gnn".to_string(), "message passing".to_string()];
        board.logs.push("planned".to_string());

        store.commit(&sid, Stage::Retrieval, &board, false).unwrap();
        let latest = store.latest(&sid).unwrap().unwrap();

        assert_eq!(latest.blackboard, board);
        assert_eq!(latest.stage, Stage::Retrieval);
        assert!(!latest.pending_interrupt);
    }

    #[test]
    fn test_latest_for_unknown_session() {
        let (db, _) = setup();
        let store = CheckpointStore::new(&db);
        assert!(store.latest("nope").unwrap().is_none());
        assert_eq!(store.latest_version("nope").unwrap(), 0);
    }

    #[test]
    fn test_history_order() {
        let (db, sid) = setup();
        let store = CheckpointStore::new(&db);
        let board = Blackboard::default();
        store.commit(&sid, Stage::Planning, &board, false).unwrap();
        store.commit(&sid, Stage::Interrupted, &board, true).unwrap();

        let history = store.history(&sid).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].stage, Stage::Interrupted);
        assert!(history[1].pending_interrupt);
        assert_eq!(store.load(&sid, 1).unwrap().stage, Stage::Planning);
    }
}
