// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The event taxonomy emitted by the agent loop on every turn.
//!
//! Exactly ten event kinds carry the turn-by-turn contract that the SSE
//! transport serializes to clients: `Delta`, `ToolStart`, `ToolDone`,
//! `StreamDone`, `AskUser`, `TurnDone`, `Error`, `Compacted`, `Titled`,
//! `Retrying`. `TodoUpdate` and `ModeChanged` are additional internal
//! telemetry carried over from tool-driven state changes (todo list,
//! research/plan/agent mode) that have no equivalent in the ten-event
//! contract but are still useful to any consumer that understands them.

use sven_config::AgentMode;
use sven_tools::{events::TodoItem, ToolCall};

/// Why a model turn stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model completed its turn normally.
    EndTurn,
    /// The model was cut off by its max-output-tokens limit.
    MaxTokens,
    /// The model hit a configured stop sequence.
    StopSequence,
    /// The model requested one or more tool calls.
    ToolUse,
    /// The turn was cancelled by the caller.
    Cancelled,
    /// The turn ended in an unrecoverable error.
    Error,
}

/// Token usage reported for the turn that just finished streaming.
#[derive(Debug, Clone, Default)]
pub struct TurnUsage {
    pub input: u32,
    pub output: u32,
    /// Tokens served from the provider's prompt cache this turn.
    pub cache_read: u32,
    /// Tokens written into the provider's prompt cache this turn.
    pub cache_write: u32,
    /// Running total of cache-read tokens for the whole session.
    pub cache_read_total: usize,
    /// Running total of cache-write tokens for the whole session.
    pub cache_write_total: usize,
    /// The model's context window, for client-side budget display.
    pub max_tokens: usize,
}

/// Which compaction path produced a `Compacted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Rolling LLM summarization using the structured-sections format.
    Structured,
    /// Rolling LLM summarization using free-form narrative prose.
    Narrative,
    /// Old messages dropped outright with no model call — used when even the
    /// compaction prompt itself would overflow the budget.
    Emergency,
}

/// Events emitted by the agent during a turn. Consumers (the SSE transport,
/// a CI runner, a TUI) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A content chunk streamed from the model. `thinking` marks the
    /// extended-reasoning channel rather than the visible response text.
    Delta { text: String, thinking: bool },
    /// The model has requested a tool call.
    ToolStart(ToolCall),
    /// A tool call finished.
    ToolDone {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// The model finished streaming this turn; usage and stop reason are final.
    StreamDone {
        usage: TurnUsage,
        stop_reason: StopReason,
    },
    /// The agent is asking the user a question. `ask_id` links the eventual
    /// answer back to this prompt.
    AskUser { ask_id: String, questions: Vec<String> },
    /// The current user turn is fully done. `partial_text` is set only when
    /// `stop_reason` is `Cancelled` and the model had streamed some text
    /// before the cancellation was observed.
    TurnDone {
        stop_reason: StopReason,
        partial_text: Option<String>,
    },
    /// A non-recoverable error ended the turn.
    Error { message: String },
    /// Context was compacted; statistics for the UI.
    Compacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        turn: u32,
    },
    /// A session title was generated or updated.
    Titled { title: String },
    /// A provider call is being retried after a transient failure.
    Retrying {
        attempt: u32,
        wait_ms: u64,
        message: String,
    },
    /// The todo list was updated.
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed.
    ModeChanged(AgentMode),
}
