// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The hook an [`crate::Agent`] uses to suspend on an `ask_user` tool call
//! until an external caller (the HTTP gateway's `ask-response` endpoint)
//! supplies an answer.
//!
//! `Agent` itself knows nothing about HTTP or oneshot-channel maps — it only
//! needs *something* that can be told "an ask with this id was just raised"
//! and awaited for a matching answer. The gateway is what actually owns the
//! `ask_id -> oneshot::Sender<String>` map described in spec.md's ask_user
//! round-trip; this trait is the seam between the two.

use async_trait::async_trait;

#[async_trait]
pub trait AskUserResponder: Send + Sync {
    /// Block until an answer for `ask_id` arrives, or the wait is cancelled.
    async fn wait_for_answer(&self, ask_id: &str) -> anyhow::Result<String>;
}
