// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::schema::SCHEMA_SQL;
use crate::types::{
    Compaction, ContentBlock, JobStatus, Recurrence, Role, ScheduledToolJob, Session,
    TranscriptMessage,
};

/// The append-only transcript store. Cheap to clone (wraps an `Arc`).
///
/// `rusqlite::Connection` is not `Sync`; every operation runs the actual
/// SQL on a blocking thread via `spawn_blocking` while holding a
/// `std::sync::Mutex` for the duration of that one call. Reads and writes
/// both go through the mutex: sqlite WAL mode still gives readers a
/// lock-free snapshot view once inside the engine, but serializing at this
/// layer keeps the Rust-side bookkeeping (e.g. sequence allocation) race-free
/// without relying on SQLite's own retry-on-busy behavior.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) a transcript store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Internal(format!("opening store: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory store, used by tests and ephemeral sub-agent runs that need
    /// no durable persistence.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Internal(format!("opening in-memory store: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    // ── Sessions ───────────────────────────────────────────────────────────

    pub async fn create_session(&self, project_path: &str, model_id: &str) -> StoreResult<Session> {
        let store = self.clone();
        let project_path = project_path.to_string();
        let model_id = model_id.to_string();
        tokio::task::spawn_blocking(move || store.create_session_sync(&project_path, &model_id))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn create_session_sync(&self, project_path: &str, model_id: &str) -> StoreResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().simple().to_string(),
            project_path: project_path.to_string(),
            model_id: model_id.to_string(),
            model_label: model_id.to_string(),
            title: "New session".to_string(),
            tags: Vec::new(),
            parent_session_id: None,
            parent_sequence: None,
            created_at: now,
            updated_at: now,
            message_count: 0,
            user_renamed: false,
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (id, project_path, model_id, model_label, title, tags, \
             parent_session_id, parent_sequence, created_at, updated_at, message_count, user_renamed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id,
                session.project_path,
                session.model_id,
                session.model_label,
                session.title,
                serde_json::to_string(&session.tags)?,
                session.parent_session_id,
                session.parent_sequence,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
                session.message_count,
                session.user_renamed as i64,
            ],
        )?;
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> StoreResult<Session> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.get_session_sync(&id))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn get_session_sync(&self, id: &str) -> StoreResult<Session> {
        let conn = self.lock();
        row_to_session(&conn, "SELECT * FROM sessions WHERE id = ?1", params![id])?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    /// Resolve a session by an unambiguous prefix of at least 6 hex chars.
    pub async fn find_session_by_prefix(&self, prefix: &str) -> StoreResult<Session> {
        if prefix.len() < 6 {
            return Err(StoreError::InvalidInput(
                "session prefix must be at least 6 characters".into(),
            ));
        }
        let store = self.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || store.find_session_by_prefix_sync(&prefix))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn find_session_by_prefix_sync(&self, prefix: &str) -> StoreResult<Session> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE id LIKE ?1")?;
        let pattern = format!("{prefix}%");
        let mut rows = stmt.query(params![pattern])?;
        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            matches.push(session_from_row(row)?);
        }
        match matches.len() {
            0 => Err(StoreError::NotFound(format!("session prefix {prefix}"))),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(StoreError::Conflict(format!(
                "ambiguous session prefix {prefix}: {} matches",
                matches.len()
            ))),
        }
    }

    pub async fn list_sessions(
        &self,
        project_filter: Option<String>,
        limit: i64,
    ) -> StoreResult<Vec<Session>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_sessions_sync(project_filter, limit))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn list_sessions_sync(
        &self,
        project_filter: Option<String>,
        limit: i64,
    ) -> StoreResult<Vec<Session>> {
        let conn = self.lock();
        let mut sessions = Vec::new();
        match project_filter.filter(|p| !p.is_empty()) {
            Some(project) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sessions WHERE project_path = ?1 \
                     ORDER BY updated_at DESC LIMIT ?2",
                )?;
                let mut rows = stmt.query(params![project, limit])?;
                while let Some(row) = rows.next()? {
                    sessions.push(session_from_row(row)?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM sessions ORDER BY updated_at DESC LIMIT ?1")?;
                let mut rows = stmt.query(params![limit])?;
                while let Some(row) = rows.next()? {
                    sessions.push(session_from_row(row)?);
                }
            }
        }
        Ok(sessions)
    }

    pub async fn delete_session(&self, id: &str) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.delete_session_sync(&id))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn delete_session_sync(&self, id: &str) -> StoreResult<()> {
        let conn = self.lock();
        // Cascades via FOREIGN KEY ... ON DELETE CASCADE for messages and
        // compactions; scheduled jobs reference sessions only by convention
        // (tool_input), so we sweep them explicitly.
        conn.execute(
            "DELETE FROM scheduled_tool_jobs WHERE json_extract(tool_input, '$.session_id') = ?1",
            params![id],
        )?;
        let affected = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    pub async fn update_session_title(&self, id: &str, title: &str, user_renamed: bool) -> StoreResult<()> {
        self.update_session_field(id, "title", title.to_string(), Some(user_renamed))
            .await
    }

    pub async fn update_session_tags(&self, id: &str, tags: &[String]) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        let tags_json = serde_json::to_string(tags)?;
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE sessions SET tags = ?1, updated_at = ?2 WHERE id = ?3",
                params![tags_json, Utc::now().to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn update_session_model(&self, id: &str, model_id: &str, model_label: &str) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        let model_id = model_id.to_string();
        let model_label = model_label.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE sessions SET model_id = ?1, model_label = ?2, updated_at = ?3 WHERE id = ?4",
                params![model_id, model_label, Utc::now().to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    async fn update_session_field(
        &self,
        id: &str,
        field: &'static str,
        value: String,
        user_renamed: Option<bool>,
    ) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = match user_renamed {
                Some(renamed) => conn.execute(
                    &format!("UPDATE sessions SET {field} = ?1, user_renamed = ?2, updated_at = ?3 WHERE id = ?4"),
                    params![value, renamed as i64, Utc::now().to_rfc3339(), id],
                )?,
                None => conn.execute(
                    &format!("UPDATE sessions SET {field} = ?1, updated_at = ?2 WHERE id = ?3"),
                    params![value, Utc::now().to_rfc3339(), id],
                )?,
            };
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    /// Create a new session whose first `at_sequence + 1` messages are
    /// copied verbatim from `src_id`. Atomic: runs inside one transaction.
    pub async fn branch_session(&self, src_id: &str, at_sequence: i64) -> StoreResult<Session> {
        let store = self.clone();
        let src_id = src_id.to_string();
        tokio::task::spawn_blocking(move || store.branch_session_sync(&src_id, at_sequence))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn branch_session_sync(&self, src_id: &str, at_sequence: i64) -> StoreResult<Session> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(|e| StoreError::Internal(e.to_string()))?;
        let src = row_to_session(&tx, "SELECT * FROM sessions WHERE id = ?1", params![src_id])?
            .ok_or_else(|| StoreError::NotFound(format!("session {src_id}")))?;

        let now = Utc::now();
        let new_session = Session {
            id: Uuid::new_v4().simple().to_string(),
            project_path: src.project_path.clone(),
            model_id: src.model_id.clone(),
            model_label: src.model_label.clone(),
            title: src.title.clone(),
            tags: src.tags.clone(),
            parent_session_id: Some(src.id.clone()),
            parent_sequence: Some(at_sequence),
            created_at: now,
            updated_at: now,
            message_count: 0,
            user_renamed: src.user_renamed,
        };
        tx.execute(
            "INSERT INTO sessions (id, project_path, model_id, model_label, title, tags, \
             parent_session_id, parent_sequence, created_at, updated_at, message_count, user_renamed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new_session.id,
                new_session.project_path,
                new_session.model_id,
                new_session.model_label,
                new_session.title,
                serde_json::to_string(&new_session.tags)?,
                new_session.parent_session_id,
                new_session.parent_sequence,
                new_session.created_at.to_rfc3339(),
                new_session.updated_at.to_rfc3339(),
                0i64,
                new_session.user_renamed as i64,
            ],
        )?;

        let mut stmt = tx.prepare(
            "SELECT * FROM messages WHERE session_id = ?1 AND sequence <= ?2 ORDER BY sequence",
        )?;
        let mut rows = stmt.query(params![src_id, at_sequence])?;
        let mut copied = 0i64;
        while let Some(row) = rows.next()? {
            let msg = message_from_row(row)?;
            insert_message_row(&tx, &new_session.id, &msg)?;
            copied += 1;
        }
        drop(stmt);
        tx.execute(
            "UPDATE sessions SET message_count = ?1 WHERE id = ?2",
            params![copied, new_session.id],
        )?;
        tx.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(Session { message_count: copied, ..new_session })
    }

    // ── Messages ───────────────────────────────────────────────────────────

    /// Allocate the next sequence number and append a message, all inside
    /// one transaction. On failure the transcript is left unchanged.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: Vec<ContentBlock>,
        usage: MessageUsage,
    ) -> StoreResult<i64> {
        let store = self.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || store.append_message_sync(&session_id, role, content, usage))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn append_message_sync(
        &self,
        session_id: &str,
        role: Role,
        content: Vec<ContentBlock>,
        usage: MessageUsage,
    ) -> StoreResult<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(|e| StoreError::Internal(e.to_string()))?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![session_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }
        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM messages WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )?;
        let msg = TranscriptMessage {
            session_id: session_id.to_string(),
            sequence: next_seq,
            role,
            content,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            created_at: Utc::now(),
        };
        insert_message_row(&tx, session_id, &msg)?;
        tx.execute(
            "UPDATE sessions SET message_count = message_count + 1, updated_at = ?1 WHERE id = ?2",
            params![msg.created_at.to_rfc3339(), session_id],
        )?;
        tx.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(next_seq)
    }

    pub async fn get_messages(&self, session_id: &str) -> StoreResult<Vec<TranscriptMessage>> {
        self.get_messages_after(session_id, -1).await
    }

    pub async fn get_messages_after(
        &self,
        session_id: &str,
        cutoff: i64,
    ) -> StoreResult<Vec<TranscriptMessage>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE session_id = ?1 AND sequence > ?2 ORDER BY sequence",
            )?;
            let mut rows = stmt.query(params![session_id, cutoff])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(message_from_row(row)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    // ── Compactions ────────────────────────────────────────────────────────

    pub async fn latest_compaction(&self, session_id: &str) -> StoreResult<Option<Compaction>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let compaction = conn
                .query_row(
                    "SELECT session_id, cutoff_sequence, summary_text, created_at \
                     FROM compactions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok(Compaction {
                            session_id: row.get(0)?,
                            cutoff_sequence: row.get(1)?,
                            summary_text: row.get(2)?,
                            created_at: parse_rfc3339(row.get::<_, String>(3)?),
                        })
                    },
                )
                .optional()?;
            Ok(compaction)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn record_compaction(
        &self,
        session_id: &str,
        cutoff_sequence: i64,
        summary_text: &str,
    ) -> StoreResult<()> {
        let store = self.clone();
        let session_id = session_id.to_string();
        let summary_text = summary_text.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            conn.execute(
                "INSERT INTO compactions (session_id, cutoff_sequence, summary_text, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(session_id) DO UPDATE SET \
                     cutoff_sequence = excluded.cutoff_sequence, \
                     summary_text = excluded.summary_text, \
                     created_at = excluded.created_at",
                params![session_id, cutoff_sequence, summary_text, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    // ── Scheduled jobs ─────────────────────────────────────────────────────

    pub async fn create_scheduled_job(
        &self,
        tool_name: &str,
        tool_input: Value,
        scheduled_for: DateTime<Utc>,
        recurrence: Recurrence,
    ) -> StoreResult<ScheduledToolJob> {
        let store = self.clone();
        let tool_name = tool_name.to_string();
        tokio::task::spawn_blocking(move || {
            let job = ScheduledToolJob {
                id: Uuid::new_v4().simple().to_string(),
                tool_name,
                tool_input,
                scheduled_for,
                recurrence,
                status: JobStatus::Pending,
                result: None,
                error: None,
                created_at: Utc::now(),
                last_attempted_at: None,
            };
            let conn = store.lock();
            insert_job_row(&conn, &job)?;
            Ok(job)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn due_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledToolJob>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let mut stmt = conn.prepare(
                "SELECT * FROM scheduled_tool_jobs \
                 WHERE status = 'pending' AND scheduled_for <= ?1 \
                 ORDER BY scheduled_for LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![now.to_rfc3339(), limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(job_from_row(row)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn mark_scheduled_job_succeeded(&self, id: &str, result: &str) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        let result = result.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE scheduled_tool_jobs SET status = 'succeeded', result = ?1, \
                 last_attempted_at = ?2 WHERE id = ?3",
                params![result, Utc::now().to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("scheduled job {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn mark_scheduled_job_failed(&self, id: &str, error: &str) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        let error = error.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE scheduled_tool_jobs SET status = 'failed', error = ?1, \
                 last_attempted_at = ?2 WHERE id = ?3",
                params![error, Utc::now().to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("scheduled job {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    /// Advance a recurring job back to `pending` with a new `scheduled_for`.
    pub async fn reschedule_scheduled_job(&self, id: &str, next: DateTime<Utc>) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE scheduled_tool_jobs SET status = 'pending', scheduled_for = ?1, \
                 last_attempted_at = ?2, error = NULL WHERE id = ?3",
                params![next.to_rfc3339(), Utc::now().to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("scheduled job {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn update_scheduled_job(
        &self,
        id: &str,
        tool_input: Value,
        scheduled_for: DateTime<Utc>,
    ) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE scheduled_tool_jobs SET tool_input = ?1, scheduled_for = ?2 WHERE id = ?3",
                params![tool_input.to_string(), scheduled_for.to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("scheduled job {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn cancel_scheduled_job(&self, id: &str) -> StoreResult<()> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let affected = conn.execute(
                "UPDATE scheduled_tool_jobs SET status = 'cancelled' WHERE id = ?1",
                params![id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("scheduled job {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    pub async fn list_scheduled_jobs(&self) -> StoreResult<Vec<ScheduledToolJob>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            let mut stmt = conn.prepare("SELECT * FROM scheduled_tool_jobs ORDER BY scheduled_for")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(job_from_row(row)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }
}

/// Token usage to attach to an appended message. All fields `None` for user
/// messages; assistant messages fill in what the provider reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cache_creation_tokens: Option<u32>,
    pub cache_read_tokens: Option<u32>,
}

// ── Row mapping helpers ─────────────────────────────────────────────────────

fn parse_rfc3339(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn session_from_row(row: &rusqlite::Row) -> StoreResult<Session> {
    let tags_json: String = row.get("tags")?;
    Ok(Session {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        model_id: row.get("model_id")?,
        model_label: row.get("model_label")?,
        title: row.get("title")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        parent_session_id: row.get("parent_session_id")?,
        parent_sequence: row.get("parent_sequence")?,
        created_at: parse_rfc3339(row.get("created_at")?),
        updated_at: parse_rfc3339(row.get("updated_at")?),
        message_count: row.get("message_count")?,
        user_renamed: row.get::<_, i64>("user_renamed")? != 0,
    })
}

fn row_to_session(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Option<Session>> {
    let raw: Option<(
        String,
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<i64>,
        String,
        String,
        i64,
        i64,
    )> = conn
        .query_row(sql, params, |row| {
            Ok((
                row.get("id")?,
                row.get("project_path")?,
                row.get("model_id")?,
                row.get("model_label")?,
                row.get("title")?,
                row.get("tags")?,
                row.get("parent_session_id")?,
                row.get("parent_sequence")?,
                row.get("created_at")?,
                row.get("updated_at")?,
                row.get("message_count")?,
                row.get("user_renamed")?,
            ))
        })
        .optional()?;

    let Some((
        id,
        project_path,
        model_id,
        model_label,
        title,
        tags_json,
        parent_session_id,
        parent_sequence,
        created_at,
        updated_at,
        message_count,
        user_renamed,
    )) = raw
    else {
        return Ok(None);
    };

    Ok(Some(Session {
        id,
        project_path,
        model_id,
        model_label,
        title,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        parent_session_id,
        parent_sequence,
        created_at: parse_rfc3339(created_at),
        updated_at: parse_rfc3339(updated_at),
        message_count,
        user_renamed: user_renamed != 0,
    }))
}

fn message_from_row(row: &rusqlite::Row) -> StoreResult<TranscriptMessage> {
    let role_str: String = row.get("role")?;
    let content_json: String = row.get("content")?;
    Ok(TranscriptMessage {
        session_id: row.get("session_id")?,
        sequence: row.get("sequence")?,
        role: role_str.parse()?,
        content: serde_json::from_str(&content_json)?,
        input_tokens: row.get::<_, Option<i64>>("input_tokens")?.map(|v| v as u32),
        output_tokens: row.get::<_, Option<i64>>("output_tokens")?.map(|v| v as u32),
        cache_creation_tokens: row
            .get::<_, Option<i64>>("cache_creation_tokens")?
            .map(|v| v as u32),
        cache_read_tokens: row.get::<_, Option<i64>>("cache_read_tokens")?.map(|v| v as u32),
        created_at: parse_rfc3339(row.get("created_at")?),
    })
}

fn insert_message_row(
    conn: &Connection,
    session_id: &str,
    msg: &TranscriptMessage,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO messages (session_id, sequence, role, content, input_tokens, \
         output_tokens, cache_creation_tokens, cache_read_tokens, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            session_id,
            msg.sequence,
            msg.role.as_str(),
            serde_json::to_string(&msg.content)?,
            msg.input_tokens,
            msg.output_tokens,
            msg.cache_creation_tokens,
            msg.cache_read_tokens,
            msg.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn job_from_row(row: &rusqlite::Row) -> StoreResult<ScheduledToolJob> {
    let recurrence_str: String = row.get("recurrence")?;
    let status_str: String = row.get("status")?;
    let tool_input_json: String = row.get("tool_input")?;
    Ok(ScheduledToolJob {
        id: row.get("id")?,
        tool_name: row.get("tool_name")?,
        tool_input: serde_json::from_str(&tool_input_json)?,
        scheduled_for: parse_rfc3339(row.get("scheduled_for")?),
        recurrence: recurrence_str.parse()?,
        status: status_str.parse()?,
        result: row.get("result")?,
        error: row.get("error")?,
        created_at: parse_rfc3339(row.get("created_at")?),
        last_attempted_at: row
            .get::<_, Option<String>>("last_attempted_at")?
            .map(parse_rfc3339),
    })
}

fn insert_job_row(conn: &Connection, job: &ScheduledToolJob) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO scheduled_tool_jobs (id, tool_name, tool_input, scheduled_for, \
         recurrence, status, result, error, created_at, last_attempted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            job.id,
            job.tool_name,
            job.tool_input.to_string(),
            job.scheduled_for.to_rfc3339(),
            job.recurrence.as_str(),
            job.status.as_str(),
            job.result,
            job.error,
            job.created_at.to_rfc3339(),
            job.last_attempted_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}
