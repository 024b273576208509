// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runs a scheduler-triggered `agent_task` job as a fresh, store-less agent.
//!
//! Mirrors `sven_core::TaskTool`'s sub-agent construction, but entered from a
//! tick rather than from inside a live session's tool-call loop: no parent
//! session, no checkpoint capability, no further sub-agent recursion.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use sven_config::{AgentConfig, AgentMode, Config};
use sven_core::{Agent, AgentEvent, AgentRuntimeContext};
use sven_tools::{
    GrepTool, ListDirTool, ReadFileTool, ShellTool, TodoWriteTool, ToolEvent, ToolRegistry,
    WriteTool,
};

/// Sub-agent output returned to the job's `result` field is capped at this
/// many bytes, matching the same contract `sven_core::TaskTool` honors.
const MAX_OUTPUT_BYTES: usize = 50 * 1024;

fn truncate_output(mut output: String) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output;
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... [truncated: sub-agent output exceeded 50 KiB]");
    output
}

/// External collaborator the scheduler calls into for `tool_name =
/// "agent_task"` jobs, so the tick loop itself stays agent-construction
/// agnostic.
#[async_trait]
pub trait AgentTaskRunner: Send + Sync {
    async fn run(&self, prompt: &str) -> anyhow::Result<String>;
}

pub struct EphemeralAgentRunner {
    model: Arc<dyn sven_model::ModelProvider>,
    config: Arc<Config>,
    agent_config: Arc<AgentConfig>,
}

impl EphemeralAgentRunner {
    pub fn new(
        model: Arc<dyn sven_model::ModelProvider>,
        config: Arc<Config>,
        agent_config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            model,
            config,
            agent_config,
        }
    }

    fn build_registry(&self, todo_event_tx: mpsc::Sender<ToolEvent>) -> ToolRegistry {
        let todos: Arc<Mutex<Vec<sven_tools::TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(ListDirTool);
        reg.register(GrepTool);
        reg.register(TodoWriteTool::new(todos, todo_event_tx));
        reg.register(WriteTool);
        reg.register(ShellTool {
            timeout_secs: self.config.tools.timeout_secs,
        });
        reg
    }
}

#[async_trait]
impl AgentTaskRunner for EphemeralAgentRunner {
    async fn run(&self, prompt: &str) -> anyhow::Result<String> {
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);
        let tools = Arc::new(self.build_registry(tool_event_tx));
        let runtime = AgentRuntimeContext::default();
        let mode_lock = Arc::new(Mutex::new(AgentMode::Agent));

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new((*self.agent_config).clone()),
            runtime,
            mode_lock,
            tool_event_rx,
            128_000,
        );

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        // Drain concurrently with the run: the agent loop awaits `tx.send`
        // from inside the turn, so nobody reading `rx` until `submit`
        // returns would deadlock once the sub-agent emits more than the
        // channel's capacity in events.
        let run = agent.submit(prompt, tx);
        tokio::pin!(run);
        let mut output = String::new();
        let mut submit_result = None;
        loop {
            tokio::select! {
                biased;
                res = &mut run, if submit_result.is_none() => {
                    submit_result = Some(res);
                }
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(AgentEvent::Delta { text, thinking: false }) => output.push_str(&text),
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
        submit_result.unwrap_or(Ok(()))?;
        Ok(truncate_output(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_matches_task_tool_contract() {
        let s = "x".repeat(MAX_OUTPUT_BYTES + 1);
        let out = truncate_output(s);
        assert!(out.ends_with("[truncated: sub-agent output exceeded 50 KiB]"));
    }
}
