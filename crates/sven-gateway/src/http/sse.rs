// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Translates the agent event taxonomy into SSE frames.
//!
//! `event: <name>\ndata: <json>\n\n`, one frame per [`AgentEvent`]. The
//! event name is the Rust variant name in `snake_case`, matching the wire
//! catalogue exactly for the ten-event contract; `todo_update` and
//! `mode_changed` ride along as additional, documented extras (see
//! `sven_core::events`) for any client that understands them.
//!
//! # Serialization, not a mutex
//!
//! The spec calls for a per-response mutex guarding concurrent writers.
//! Here that guarantee falls out of the channel instead: every producer —
//! the agent loop's tool-call interleaving included — writes into the same
//! `mpsc` sender, whose queue is itself the serialization point, and the
//! SSE body is driven by a single consumer stream reading that queue in
//! order. No second writer ever touches the response body directly.

use axum::response::sse::Event;
use serde_json::{json, Value};

use sven_core::AgentEvent;

pub fn event_name(ev: &AgentEvent) -> &'static str {
    match ev {
        AgentEvent::Delta { .. } => "delta",
        AgentEvent::ToolStart(_) => "tool_start",
        AgentEvent::ToolDone { .. } => "tool_done",
        AgentEvent::StreamDone { .. } => "stream_done",
        AgentEvent::AskUser { .. } => "ask_user",
        AgentEvent::TurnDone { .. } => "turn_done",
        AgentEvent::Error { .. } => "error",
        AgentEvent::Compacted { .. } => "compacted",
        AgentEvent::Titled { .. } => "titled",
        AgentEvent::Retrying { .. } => "retrying",
        AgentEvent::TodoUpdate(_) => "todo_update",
        AgentEvent::ModeChanged(_) => "mode_changed",
    }
}

/// JSON payload for one event. Field names match §4.6's SSE event catalogue
/// for the ten spec'd events; fields beyond that catalogue (e.g. `args` on
/// `tool_start`, the full usage breakdown on `stream_done`) are additive.
pub fn event_payload(ev: &AgentEvent) -> Value {
    match ev {
        AgentEvent::Delta { text, thinking } => json!({ "text": text, "thinking": thinking }),
        AgentEvent::ToolStart(call) => json!({
            "tool_use_id": call.id,
            "tool_name": call.name,
            "args": call.args,
        }),
        AgentEvent::ToolDone { call_id, tool_name, output, is_error } => json!({
            "tool_use_id": call_id,
            "tool_name": tool_name,
            "result": output,
            "is_error": is_error,
        }),
        AgentEvent::StreamDone { usage, stop_reason } => json!({
            "input_tokens": usage.input,
            "output_tokens": usage.output,
            "cache_creation_input_tokens": usage.cache_write,
            "cache_read_input_tokens": usage.cache_read,
            "stop_reason": stop_reason_str(*stop_reason),
        }),
        AgentEvent::AskUser { ask_id, questions } => json!({
            "ask_id": ask_id,
            "prompt": questions.join("\n\n"),
            "questions": questions,
        }),
        AgentEvent::TurnDone { stop_reason, partial_text } => json!({
            "stop_reason": stop_reason_str(*stop_reason),
            "partial_text": partial_text,
        }),
        AgentEvent::Error { message } => json!({ "error": message }),
        AgentEvent::Compacted { tokens_before, tokens_after, strategy, turn } => json!({
            "tokens_before": tokens_before,
            "tokens_after": tokens_after,
            "strategy": compaction_strategy_str(*strategy),
            "turn": turn,
        }),
        AgentEvent::Titled { title } => json!({ "title": title, "tags": Value::Null }),
        AgentEvent::Retrying { attempt, wait_ms, message } => json!({
            "attempt": attempt,
            "wait_ms": wait_ms,
            "message": message,
        }),
        AgentEvent::TodoUpdate(items) => json!({ "items": items.len() }),
        AgentEvent::ModeChanged(mode) => json!({ "mode": format!("{mode:?}") }),
    }
}

fn stop_reason_str(reason: sven_core::StopReason) -> &'static str {
    use sven_core::StopReason::*;
    match reason {
        EndTurn => "end_turn",
        MaxTokens => "max_tokens",
        StopSequence => "stop_sequence",
        ToolUse => "tool_use",
        Cancelled => "cancelled",
        Error => "error",
    }
}

fn compaction_strategy_str(s: sven_core::CompactionStrategyUsed) -> &'static str {
    use sven_core::CompactionStrategyUsed::*;
    match s {
        Structured => "structured",
        Narrative => "narrative",
        Emergency => "emergency",
    }
}

pub fn to_sse_event(ev: &AgentEvent) -> Event {
    Event::default().event(event_name(ev)).json_data(event_payload(ev)).unwrap_or_else(|_| {
        Event::default().event("error").data("{\"error\":\"event serialization failed\"}")
    })
}
