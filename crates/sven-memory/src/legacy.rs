// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Boundary translation for the legacy `scheduled_tweets` table.
//!
//! The source kept a separate table for scheduled tweets and parsed a tool
//! result *string* to recover the posted tweet id — brittle, per the spec's
//! Design Notes. Here the translation happens once, at the store boundary:
//! callers above this module only ever see [`ScheduledToolJob`] with
//! `tool_name = "x_post"`; nothing above `sven-memory` parses free text.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::types::{JobStatus, Recurrence, ScheduledToolJob};

pub const X_POST_TOOL_NAME: &str = "x_post";

pub struct LegacyTweetRow {
    pub id: String,
    pub tweet_text: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub tweet_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Translate a legacy tweet row into the structured job shape the rest of
/// the daemon operates on. Legacy tweets are always one-shot (`once`).
pub fn scheduled_tweet_to_job(row: LegacyTweetRow) -> ScheduledToolJob {
    ScheduledToolJob {
        id: row.id,
        tool_name: X_POST_TOOL_NAME.to_string(),
        tool_input: json!({ "text": row.tweet_text }),
        scheduled_for: row.scheduled_for,
        recurrence: Recurrence::Once,
        status: row.status,
        result: row.tweet_id.map(|id| json!({ "tweet_id": id }).to_string()),
        error: row.error,
        created_at: row.created_at,
        last_attempted_at: None,
    }
}
