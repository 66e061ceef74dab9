//! # Sessions
//!
//! One row per review run. Sessions are never deleted automatically; they
//! stay around for inspection and continuation.

use super::checkpoint::parse_timestamp;
use super::db::ScholarDb;
use super::documents::Language;
use crate::error::{ErrorCategory, SessionError};
use crate::workflow::stage::Stage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Interrupted,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "interrupted" => Some(Self::Interrupted),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Status implied by the stage a session is parked at
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Interrupted => Self::Interrupted,
            Stage::Completed => Self::Completed,
            Stage::Failed => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// A review session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub query: String,
    pub language: Language,
    pub status: SessionStatus,
    /// Last committed stage
    pub stage: Stage,
    pub error: Option<SessionError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session store backed by the `sessions` table
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SessionStore {
    pub fn new(db: &ScholarDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    pub fn create(&self, query: &str, language: Language) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            language,
            status: SessionStatus::Running,
            stage: Stage::Planning,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO sessions (id, query, language, status, stage, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session.id,
                session.query,
                language_str(language),
                session.status.as_str(),
                session.stage.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .context("Failed to create session")?;

        tracing::info!(session_id = %session.id, "Session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            r#"
            SELECT id, query, language, status, stage, error_category, error_message, created_at, updated_at
            FROM sessions WHERE id = ?1
            "#,
            params![id],
            Self::row_to_session,
        )
        .optional()
        .context("Failed to load session")
    }

    /// Record the stage a session is parked at; clears any previous error
    pub fn set_stage(&self, id: &str, stage: Stage) -> Result<()> {
        self.update(id, SessionStatus::for_stage(stage), stage, None)
    }

    /// Mark a session failed with a stable category
    pub fn mark_failed(&self, id: &str, stage: Stage, error: &SessionError) -> Result<()> {
        tracing::warn!(session_id = %id, category = %error.category, "Session failed: {}", error.message);
        self.update(id, SessionStatus::Failed, stage, Some(error))
    }

    fn update(
        &self,
        id: &str,
        status: SessionStatus,
        stage: Stage,
        error: Option<&SessionError>,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let affected = conn.execute(
            r#"
            UPDATE sessions
            SET status = ?2, stage = ?3, error_category = ?4, error_message = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                id,
                status.as_str(),
                stage.as_str(),
                error.map(|e| e.category.as_str()),
                error.map(|e| e.message.clone()),
                Utc::now().to_rfc3339(),
            ],
        )?;

        if affected == 0 {
            anyhow::bail!("Session {} not found", id);
        }
        Ok(())
    }

    /// Most recently updated sessions first
    pub fn list(&self, limit: usize) -> Result<Vec<Session>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, query, language, status, stage, error_category, error_message, created_at, updated_at
            FROM sessions
            ORDER BY updated_at DESC, created_at DESC
            LIMIT ?1
            "#,
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], Self::row_to_session)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list sessions")?;

        Ok(sessions)
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let id: String = row.get(0)?;
        let query: String = row.get(1)?;
        let language: String = row.get(2)?;
        let status: String = row.get(3)?;
        let stage: String = row.get(4)?;
        let error_category: Option<String> = row.get(5)?;
        let error_message: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;

        let error = error_category
            .as_deref()
            .and_then(ErrorCategory::parse)
            .map(|category| SessionError {
                category,
                message: error_message.unwrap_or_default(),
            });

        Ok(Session {
            id,
            query,
            language: Language::parse(&language).unwrap_or_default(),
            status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Failed),
            stage: Stage::parse(&stage).unwrap_or(Stage::Failed),
            error,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

fn language_str(language: Language) -> &'static str {
    match language {
        Language::En => "en",
        Language::Zh => "zh",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let db = ScholarDb::open_in_memory().unwrap();
        let store = SessionStore::new(&db);
        let session = store.create("graph neural networks", Language::Zh).unwrap();

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.query, "graph neural networks");
        assert_eq!(loaded.language, Language::Zh);
        assert_eq!(loaded.status, SessionStatus::Running);
        assert_eq!(loaded.stage, Stage::Planning);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_mark_failed_records_category() {
        let db = ScholarDb::open_in_memory().unwrap();
        let store = SessionStore::new(&db);
        let session = store.create("q", Language::En).unwrap();

        store
            .mark_failed(
                &session.id,
                Stage::Generation,
                &SessionError {
                    category: ErrorCategory::Timeout,
                    message: "pipeline timed out after 300s".to_string(),
                },
            )
            .unwrap();

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Failed);
        assert_eq!(loaded.error.unwrap().category, ErrorCategory::Timeout);

        store.set_stage(&session.id, Stage::Validation).unwrap();
        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Running);
        assert!(loaded.error.is_none());
    }

    #[test]
    fn test_update_unknown_session_fails() {
        let db = ScholarDb::open_in_memory().unwrap();
        let store = SessionStore::new(&db);
        assert!(store.set_stage("missing", Stage::Retrieval).is_err());
    }

    #[test]
    fn test_list_limit() {
        let db = ScholarDb::open_in_memory().unwrap();
        let store = SessionStore::new(&db);
        for i in 0..4 {
            store.create(&format!("query {}", i), Language::En).unwrap();
        }
        assert_eq!(store.list(2).unwrap().len(), 2);
        assert_eq!(store.list(10).unwrap().len(), 4);
    }
}
