// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only transcript store: sessions, messages, compactions, and
//! scheduled tool jobs, backed by SQLite.

mod error;
mod legacy;
mod schema;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use legacy::{scheduled_tweet_to_job, LegacyTweetRow, X_POST_TOOL_NAME};
pub use store::{MessageUsage, Store};
pub use types::{
    Compaction, ContentBlock, JobStatus, Recurrence, Role, ScheduledToolJob, Session,
    TranscriptMessage,
};
