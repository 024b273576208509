// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sven_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Maximum output tokens the current model will produce in one turn
    /// (from the model catalog). Used only for client-side budget display;
    /// does not affect `context_fraction`.
    pub max_output_tokens: usize,
    /// Estimated token cost of items sent with every request but not stored
    /// in `messages` — tool schemas and the dynamic context block. Updated
    /// once per turn by the agent loop before a budget check.
    pub schema_overhead: usize,
    /// Running multiplier correcting the chars/4 token estimate against the
    /// provider's actually-reported input token count. Starts at 1.0 and is
    /// nudged toward `actual / estimated` after every turn with usage data.
    pub calibration_factor: f32,
    /// Lifetime total of prompt-cache-read tokens billed to this session.
    pub cache_read_total: usize,
    /// Lifetime total of prompt-cache-write tokens billed to this session.
    pub cache_write_total: usize,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            calibration_factor: 1.0,
            cache_read_total: 0,
            cache_write_total: 0,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    /// Input tokens available for the conversation transcript itself, after
    /// reserving room for tool schemas and the dynamic context block.
    pub fn input_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.schema_overhead)
    }

    /// Record prompt-cache usage reported for the turn just completed.
    pub fn add_cache_usage(&mut self, cache_read: u32, cache_write: u32) {
        self.cache_read_total += cache_read as usize;
        self.cache_write_total += cache_write as usize;
    }

    /// Nudge `calibration_factor` toward the ratio of actual-to-estimated
    /// input tokens reported by the provider for the turn just completed.
    /// Applies the correction gradually (30% of the observed delta) so a
    /// single outlier turn cannot swing the estimate wildly.
    pub fn update_calibration(&mut self, actual_input: u32, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let observed = actual_input as f32 / estimated as f32;
        self.calibration_factor += (observed - self.calibration_factor) * 0.3;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
