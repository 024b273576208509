// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The durable shapes persisted by the transcript store.
//!
//! These are deliberately distinct from `sven_model::Message`, which is the
//! *wire* shape sent to a provider on each turn. A [`TranscriptMessage`] can
//! hold several [`ContentBlock`]s in one row (e.g. a leading `text` block
//! followed by one or more `tool_use` blocks in the same assistant turn);
//! `sven-core` converts between the two when it builds a provider request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversation with a persistent transcript, model binding, and optional
/// git checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub model_id: String,
    pub model_label: String,
    pub title: String,
    pub tags: Vec<String>,
    pub parent_session_id: Option<String>,
    pub parent_sequence: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
    pub user_renamed: bool,
}

/// `role` of a [`TranscriptMessage`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(crate::error::StoreError::Internal(format!(
                "unknown stored role: {other}"
            ))),
        }
    }
}

/// A variant element of a message: text, tool_use, tool_result, or thinking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        tool_use_id: String,
        tool_name: String,
        tool_input: Value,
    },
    ToolResult {
        tool_use_id: String,
        result: String,
        is_error: bool,
    },
    /// Opaque extended-thinking content. Preserved verbatim, never rendered
    /// to the user, never re-sent to the provider as a regular text block.
    Thinking {
        text: String,
    },
}

/// One row of the append-only transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub sequence: i64,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cache_creation_tokens: Option<u32>,
    pub cache_read_tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptMessage {
    /// Plain-text body when this message holds a single `Text` block.
    /// Most user messages take this shape.
    pub fn as_plain_text(&self) -> Option<&str> {
        match self.content.as_slice() {
            [ContentBlock::Text { text }] => Some(text),
            _ => None,
        }
    }
}

/// `(session_id, cutoff_sequence, summary_text, created_at)` — at most one
/// latest record per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Compaction {
    pub session_id: String,
    pub cutoff_sequence: i64,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Once,
    Hourly,
    Daily,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Once => "once",
            Recurrence::Hourly => "hourly",
            Recurrence::Daily => "daily",
        }
    }

    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Recurrence::Once => None,
            Recurrence::Hourly => Some(chrono::Duration::hours(1)),
            Recurrence::Daily => Some(chrono::Duration::days(1)),
        }
    }
}

impl std::str::FromStr for Recurrence {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Recurrence::Once),
            "hourly" => Ok(Recurrence::Hourly),
            "daily" => Ok(Recurrence::Daily),
            other => Err(crate::error::StoreError::Internal(format!(
                "unknown recurrence: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(crate::error::StoreError::Internal(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// A durable job executed by the Tool-Call Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledToolJob {
    pub id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub scheduled_for: DateTime<Utc>,
    pub recurrence: Recurrence,
    pub status: JobStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempted_at: Option<DateTime<Utc>>,
}
