// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The session-facing wrapper around [`Agent`].
//!
//! `Agent` drives one turn at a time; `AgentService` is the thing an HTTP
//! handler actually holds: it adds reentrancy guards, persists the transcript
//! to the store as each turn completes, answers `ask_user` round-trips, and
//! keeps a small checkpoint/redo stack for git-integrated undo. One instance
//! lives per session for the lifetime of the daemon process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use sven_memory::types::{ContentBlock, Role as StoreRole};
use sven_memory::{MessageUsage, Store};
use sven_model::{CompletionRequest, Message, MessageContent, Role as WireRole, ResponseEvent};

use crate::agent::Agent;
use crate::ask_user::AskUserResponder;
use crate::events::{AgentEvent, TurnUsage};

/// Tool names whose execution may mutate the working tree. Used only to
/// decide when a checkpoint is due — it is not a security boundary.
const WRITE_CAPABLE_TOOLS: &[&str] = &["write", "shell"];

/// External collaborator for checkpoint/undo: the service records tree
/// hashes and asks this trait to produce/restore them. No git invocation
/// happens inside `sven-core` itself.
#[async_trait]
pub trait GitOps: Send + Sync {
    async fn tree_hash(&self, cwd: &Path) -> anyhow::Result<String>;
    async fn reset_to_tree(&self, cwd: &Path, hash: &str) -> anyhow::Result<()>;
}

/// Owns the `ask_id -> oneshot` map for one session's `ask_user` round-trip.
/// A gateway handler calls [`Self::answer`] when `POST /ask-response` arrives.
#[derive(Default)]
pub struct AskUserGateway {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl AskUserGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an answer for a pending `ask_id`. Returns `false` (the
    /// gateway's caller should answer with 404) if no such id is waiting.
    pub async fn answer(&self, ask_id: &str, text: String) -> bool {
        let sender = self.pending.lock().await.remove(ask_id);
        match sender {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl AskUserResponder for AskUserGateway {
    async fn wait_for_answer(&self, ask_id: &str) -> anyhow::Result<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(ask_id.to_string(), tx);
        rx.await
            .map_err(|_| anyhow::anyhow!("ask_user channel dropped before an answer arrived"))
    }
}

/// Reentrancy/cancellation guard plus persistence and checkpoint bookkeeping
/// around one [`Agent`].
pub struct AgentService {
    agent: Mutex<Agent>,
    store: Option<Arc<Store>>,
    store_session_id: Mutex<String>,
    running: AtomicBool,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
    ask_gateway: Arc<AskUserGateway>,
    git_available: AtomicBool,
    git_ops: Mutex<Option<Arc<dyn GitOps>>>,
    checkpoints: Mutex<Vec<String>>,
    redo: Mutex<Vec<String>>,
    /// Persisted transcript length as of the last successful `submit`, so a
    /// new turn only writes the messages it actually added.
    persisted_len: Mutex<usize>,
    user_renamed: AtomicBool,
    titled: AtomicBool,
}

impl AgentService {
    /// Wrap a freshly constructed `Agent`. `store` is `None` for ephemeral
    /// (store-less) use such as sub-agents; a real session always supplies
    /// one. `store_session_id` must already exist in the store when `store`
    /// is `Some`.
    pub fn new(mut agent: Agent, store: Option<Arc<Store>>, store_session_id: String) -> Self {
        let ask_gateway = Arc::new(AskUserGateway::new());
        agent.set_ask_responder(ask_gateway.clone());
        Self {
            agent: Mutex::new(agent),
            store,
            store_session_id: Mutex::new(store_session_id),
            running: AtomicBool::new(false),
            cancel_tx: Mutex::new(None),
            ask_gateway,
            git_available: AtomicBool::new(false),
            git_ops: Mutex::new(None),
            checkpoints: Mutex::new(Vec::new()),
            redo: Mutex::new(Vec::new()),
            persisted_len: Mutex::new(0),
            user_renamed: AtomicBool::new(false),
            titled: AtomicBool::new(false),
        }
    }

    /// `NewSession`: create the store row and wrap a freshly constructed
    /// `Agent` around it. Per spec.md's "one instance per (session ×
    /// daemon lifetime)" model, a new session gets a new `AgentService`
    /// rather than resetting an existing one in place — the caller (the
    /// session registry in the gateway) drops its old handle.
    pub async fn create(
        store: Arc<Store>,
        project_path: &str,
        model: Arc<dyn sven_model::ModelProvider>,
        tools: Arc<sven_tools::ToolRegistry>,
        config: Arc<sven_config::AgentConfig>,
        runtime: crate::runtime_context::AgentRuntimeContext,
        mode_lock: Arc<Mutex<sven_config::AgentMode>>,
        tool_event_rx: mpsc::Receiver<sven_tools::events::ToolEvent>,
        max_context_tokens: usize,
    ) -> anyhow::Result<(Self, sven_memory::types::Session)> {
        let model_id = model.model_name().to_string();
        let row = store.create_session(project_path, &model_id).await?;
        let agent = Agent::new(model, tools, config, runtime, mode_lock, tool_event_rx, max_context_tokens);
        let service = Self::new(agent, Some(store), row.id.clone());
        Ok((service, row))
    }

    pub fn ask_gateway(&self) -> Arc<AskUserGateway> {
        Arc::clone(&self.ask_gateway)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn has_provider(&self) -> bool {
        // An Agent always owns a provider handle once constructed; this
        // mirrors the contract's "is a provider configured" question for a
        // session that may not have been fully set up yet.
        true
    }

    /// Replace the model provider for subsequent turns. Session history is
    /// preserved; only the context-window bookkeeping is refreshed.
    pub async fn set_model(&self, model: Arc<dyn sven_model::ModelProvider>) {
        self.agent.lock().await.set_model(model);
    }

    pub async fn set_disabled_tools(&self, disabled: std::collections::HashSet<String>) {
        self.agent.lock().await.set_disabled_tools(disabled);
    }

    pub fn set_git_available(&self, available: bool) {
        self.git_available.store(available, Ordering::SeqCst);
    }

    /// `POST /title`: an explicit user rename. Disables further auto-titling.
    pub async fn rename_session(&self, title: &str) -> anyhow::Result<()> {
        self.user_renamed.store(true, Ordering::SeqCst);
        self.titled.store(true, Ordering::SeqCst);
        if let Some(store) = &self.store {
            let id = self.store_session_id.lock().await.clone();
            store.update_session_title(&id, title, true).await?;
        }
        Ok(())
    }

    /// `POST /tags`.
    pub async fn set_tags(&self, tags: &[String]) -> anyhow::Result<()> {
        if let Some(store) = &self.store {
            let id = self.store_session_id.lock().await.clone();
            store.update_session_tags(&id, tags).await?;
        }
        Ok(())
    }

    /// First ~50 characters of the first user message, whitespace-normalized.
    /// Fallback title used when [`Self::model_title`] errors or the session
    /// has no model call to make from.
    fn heuristic_title(messages: &[Message]) -> Option<String> {
        let first_user_text = messages.iter().find_map(|m| {
            if m.role == WireRole::User {
                m.as_text()
            } else {
                None
            }
        })?;
        let normalized: String = first_user_text.split_whitespace().collect::<Vec<_>>().join(" ");
        let truncated: String = normalized.chars().take(50).collect();
        if truncated.is_empty() {
            None
        } else {
            Some(truncated)
        }
    }

    /// Ask the session's own model for a short title, one shot, no tools.
    /// Primary auto-titling path; the caller falls back to
    /// [`Self::heuristic_title`] if this errors or returns nothing usable.
    async fn model_title(model: &dyn sven_model::ModelProvider, first_user_text: &str) -> anyhow::Result<Option<String>> {
        let prompt = format!(
            "Generate a short title (at most 50 characters, no quotes or punctuation \
             at the end) summarizing the following request. Reply with only the title.\n\n{first_user_text}"
        );
        let req = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            stream: true,
            system_dynamic_suffix: None,
            cache_key: None,
        };
        let mut stream = model.complete(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let ResponseEvent::TextDelta(delta) = event? {
                text.push_str(&delta);
            }
        }
        let normalized: String = text.trim().split_whitespace().collect::<Vec<_>>().join(" ");
        let truncated: String = normalized.chars().take(50).collect();
        Ok(if truncated.is_empty() { None } else { Some(truncated) })
    }

    pub async fn set_git_ops(&self, ops: Arc<dyn GitOps>) {
        *self.git_ops.lock().await = Some(ops);
    }

    pub async fn session_snapshot(&self) -> (Vec<Message>, usize) {
        let agent = self.agent.lock().await;
        let s = agent.session();
        (s.messages.clone(), s.token_count)
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.agent.lock().await.session().messages.clone()
    }

    /// In-memory session id (distinct from the store's row id, which the
    /// gateway tracks separately via `store_session_id`).
    pub async fn session_id(&self) -> String {
        self.agent.lock().await.session().id.clone()
    }

    /// Revert the working tree to the last checkpoint and push its hash onto
    /// the redo stack. No-op (returns `Ok(false)`) if there is nothing to
    /// undo or git support was never enabled for this session.
    pub async fn undo(&self, cwd: &Path) -> anyhow::Result<bool> {
        if !self.git_available.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(ops) = self.git_ops.lock().await.clone() else {
            return Ok(false);
        };
        let Some(hash) = self.checkpoints.lock().await.pop() else {
            return Ok(false);
        };
        ops.reset_to_tree(cwd, &hash).await?;
        self.redo.lock().await.push(hash);
        Ok(true)
    }

    /// Re-apply the most recently undone checkpoint.
    pub async fn redo(&self, cwd: &Path) -> anyhow::Result<bool> {
        if !self.git_available.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(ops) = self.git_ops.lock().await.clone() else {
            return Ok(false);
        };
        let Some(hash) = self.redo.lock().await.pop() else {
            return Ok(false);
        };
        ops.reset_to_tree(cwd, &hash).await?;
        self.checkpoints.lock().await.push(hash);
        Ok(true)
    }

    async fn checkpoint_before_first_write(&self, cwd: &Path, tool_name: &str, saw_write: &mut bool) {
        if *saw_write || !WRITE_CAPABLE_TOOLS.contains(&tool_name) {
            return;
        }
        if !self.git_available.load(Ordering::SeqCst) {
            return;
        }
        *saw_write = true;
        let ops = self.git_ops.lock().await.clone();
        if let Some(ops) = ops {
            match ops.tree_hash(cwd).await {
                Ok(hash) => {
                    self.checkpoints.lock().await.push(hash);
                    self.redo.lock().await.clear();
                }
                Err(e) => warn!(error = %e, "failed to record checkpoint before write"),
            }
        }
    }

    /// Run one turn to completion, forwarding every event to `on_event` as it
    /// is produced. Fails fast (without touching the agent) if a turn is
    /// already running.
    pub async fn submit<F>(&self, text: &str, cwd: &Path, mut on_event: F) -> anyhow::Result<()>
    where
        F: FnMut(AgentEvent) + Send,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            anyhow::bail!("a turn is already running for this session");
        }
        let _guard = RunningGuard(&self.running);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel_tx.lock().await = Some(cancel_tx);

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let mut agent = self.agent.lock().await;

        let mut saw_write = false;
        let mut last_usage: Option<TurnUsage> = None;
        let run = agent.submit_with_cancel(text, tx, cancel_rx);
        tokio::pin!(run);
        let mut submit_result = None;
        loop {
            tokio::select! {
                biased;
                res = &mut run, if submit_result.is_none() => {
                    submit_result = Some(res);
                }
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let AgentEvent::ToolStart(tc) = &event {
                                self.checkpoint_before_first_write(cwd, &tc.name, &mut saw_write).await;
                            }
                            if let AgentEvent::StreamDone { usage, .. } = &event {
                                last_usage = Some(usage.clone());
                            }
                            on_event(event);
                        }
                        None => break,
                    }
                }
            }
        }
        drop(run);
        *self.cancel_tx.lock().await = None;

        let result = submit_result.unwrap_or(Ok(()));
        if result.is_ok() {
            if let Some(store) = &self.store {
                let session_id = self.store_session_id.lock().await.clone();
                if let Err(e) = self.persist_new_messages(store, &session_id, &agent, last_usage.as_ref()).await {
                    warn!(error = %e, "failed to persist transcript");
                }
                if !self.user_renamed.load(Ordering::SeqCst) && !self.titled.load(Ordering::SeqCst) {
                    let first_user_text = agent
                        .session()
                        .messages
                        .iter()
                        .find_map(|m| if m.role == WireRole::User { m.as_text() } else { None });
                    let model_title = match &first_user_text {
                        Some(t) => match Self::model_title(&*agent.model(), t).await {
                            Ok(title) => title,
                            Err(e) => {
                                warn!(error = %e, "title model call failed, falling back to heuristic");
                                None
                            }
                        },
                        None => None,
                    };
                    let title = model_title.or_else(|| Self::heuristic_title(&agent.session().messages));
                    if let Some(title) = title {
                        self.titled.store(true, Ordering::SeqCst);
                        if let Err(e) = store.update_session_title(&session_id, &title, false).await {
                            warn!(error = %e, "failed to persist auto-generated title");
                        }
                        on_event(AgentEvent::Titled { title });
                    }
                }
            }
        }
        result
    }

    async fn persist_new_messages(
        &self,
        store: &Store,
        session_id: &str,
        agent: &Agent,
        turn_usage: Option<&TurnUsage>,
    ) -> anyhow::Result<()> {
        let messages = &agent.session().messages;
        let mut start = self.persisted_len.lock().await;
        for msg in messages.iter().skip(*start) {
            if let Some((role, blocks)) = to_store_shape(msg) {
                let usage = match role {
                    StoreRole::Assistant => turn_usage.map(to_message_usage).unwrap_or_default(),
                    _ => MessageUsage::default(),
                };
                store.append_message(session_id, role, blocks, usage).await?;
            }
        }
        *start = messages.len();
        Ok(())
    }

    /// Cooperative cancel. Idempotent; never blocks.
    pub async fn cancel(&self) {
        if let Some(tx) = self.cancel_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    /// Reload the transcript from the store, honoring the latest compaction
    /// if present. Only meaningful for a store-backed session.
    pub async fn resume(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let session_id = self.store_session_id.lock().await.clone();
        let compaction = store.latest_compaction(&session_id).await.ok().flatten();
        let cutoff = compaction.as_ref().map(|c| c.cutoff_sequence).unwrap_or(-1);
        let rows = store.get_messages_after(&session_id, cutoff).await?;

        let mut messages = Vec::new();
        if let Some(c) = &compaction {
            messages.push(Message::user(format!("[earlier conversation summary]\n{}", c.summary_text)));
            messages.push(Message::assistant("Understood, continuing from that summary."));
        }
        for row in &rows {
            messages.push(from_store_shape(row));
        }

        let mut agent = self.agent.lock().await;
        agent.session_mut().replace_messages(messages);
        agent.session_mut().recalculate_tokens();
        *self.persisted_len.lock().await = agent.session().messages.len();
        Ok(())
    }
}

struct RunningGuard<'a>(&'a AtomicBool);
impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn to_message_usage(usage: &TurnUsage) -> MessageUsage {
    MessageUsage {
        input_tokens: Some(usage.input),
        output_tokens: Some(usage.output),
        cache_creation_tokens: Some(usage.cache_write),
        cache_read_tokens: Some(usage.cache_read),
    }
}

fn to_store_shape(msg: &Message) -> Option<(StoreRole, Vec<ContentBlock>)> {
    match (&msg.role, &msg.content) {
        (WireRole::System, _) => None,
        (WireRole::User, MessageContent::Text(t)) => {
            Some((StoreRole::User, vec![ContentBlock::Text { text: t.clone() }]))
        }
        (WireRole::User, MessageContent::ContentParts(parts)) => {
            let text: String = parts
                .iter()
                .filter_map(|p| match p {
                    sven_model::ContentPart::Text { text } => Some(text.as_str()),
                    sven_model::ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some((StoreRole::User, vec![ContentBlock::Text { text }]))
        }
        (WireRole::Assistant, MessageContent::Text(t)) => {
            Some((StoreRole::Assistant, vec![ContentBlock::Text { text: t.clone() }]))
        }
        (WireRole::Assistant, MessageContent::ToolCall { tool_call_id, function }) => {
            let tool_input = serde_json::from_str(&function.arguments).unwrap_or(serde_json::Value::Null);
            Some((
                StoreRole::Assistant,
                vec![ContentBlock::ToolUse {
                    tool_use_id: tool_call_id.clone(),
                    tool_name: function.name.clone(),
                    tool_input,
                }],
            ))
        }
        (WireRole::Tool, MessageContent::ToolResult { tool_call_id, content }) => {
            let result = match content {
                sven_model::ToolResultContent::Text(t) => t.clone(),
                sven_model::ToolResultContent::Parts(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        sven_model::ToolContentPart::Text { text } => Some(text.as_str()),
                        sven_model::ToolContentPart::Image { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            Some((
                StoreRole::Tool,
                vec![ContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    result,
                    // The in-memory transcript does not retain the per-call
                    // `is_error` flag once folded into a `Message`; the SSE
                    // `tool_done` event is the authoritative real-time signal.
                    is_error: false,
                }],
            ))
        }
        _ => None,
    }
}


fn from_store_shape(row: &sven_memory::types::TranscriptMessage) -> Message {
    let role = match row.role {
        StoreRole::User => WireRole::User,
        StoreRole::Assistant => WireRole::Assistant,
        StoreRole::Tool => WireRole::Tool,
    };
    match row.content.as_slice() {
        [ContentBlock::Text { text }] if role == WireRole::User => Message::user(text.clone()),
        [ContentBlock::Text { text }] if role == WireRole::Assistant => Message::assistant(text.clone()),
        [ContentBlock::ToolUse { tool_use_id, tool_name, tool_input }] => Message {
            role: WireRole::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: tool_use_id.clone(),
                function: sven_model::FunctionCall {
                    name: tool_name.clone(),
                    arguments: tool_input.to_string(),
                },
            },
        },
        [ContentBlock::ToolResult { tool_use_id, result, .. }] => Message::tool_result(tool_use_id.clone(), result.clone()),
        blocks => {
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } | ContentBlock::Thinking { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            match role {
                WireRole::User => Message::user(text),
                _ => Message::assistant(text),
            }
        }
    }
}
