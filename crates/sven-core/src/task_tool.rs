use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use sven_config::{AgentConfig, AgentMode, Config};
use sven_tools::{
    GrepTool, ListDirTool, ReadFileTool, ShellTool, TodoWriteTool, WriteTool,
    ApprovalPolicy, Tool, ToolCall, ToolContext, ToolEvent, ToolOutput, ToolRegistry,
};

use crate::agent::Agent;
use crate::events::AgentEvent;
use crate::runtime_context::AgentRuntimeContext;

/// Sub-agents spawned via `task` never spawn further sub-agents — depth is
/// always exactly one level below whatever called `task`.
const MAX_DEPTH: usize = 1;

/// Sub-agent output returned to the caller is capped at this many bytes.
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

pub struct TaskTool {
    model: Arc<dyn sven_model::ModelProvider>,
    config: Arc<Config>,
    agent_config: Arc<AgentConfig>,
    depth: Arc<AtomicUsize>,
}

impl TaskTool {
    pub fn new(
        model: Arc<dyn sven_model::ModelProvider>,
        config: Arc<Config>,
        agent_config: Arc<AgentConfig>,
        depth: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            model,
            config,
            agent_config,
            depth,
        }
    }

    fn build_sub_registry(&self, todo_event_tx: mpsc::Sender<ToolEvent>) -> ToolRegistry {
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
        // TaskTool is intentionally NOT registered here: sub-agents never
        // nest further.
        reg
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text output. \
         Useful for delegating isolated sub-tasks. The sub-agent has access to the standard \
         file and shell tools but cannot spawn further sub-agents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                },
                "mode": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the sub-agent (default: agent)"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["prompt"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };
        let mode_str = call
            .args
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("agent");
        let mode = match mode_str {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(prompt = %prompt, mode = %mode, depth = current_depth + 1, "task: spawning sub-agent");

        let mut sub_config = (*self.agent_config).clone();
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);
        let tools = Arc::new(self.build_sub_registry(tool_event_tx));
        let runtime = AgentRuntimeContext {
            project_root: Some(ctx.cwd.clone()),
            ..Default::default()
        };
        let mode_lock = Arc::new(Mutex::new(mode));

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new(sub_config),
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
        let run = agent.submit(&prompt, tx);
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
        let submit_result = submit_result.unwrap_or(Ok(()));

        self.depth.fetch_sub(1, Ordering::Relaxed);

        match submit_result {
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, truncate_output(output))
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        let s = "hello".to_string();
        assert_eq!(truncate_output(s.clone()), s);
    }

    #[test]
    fn long_output_is_truncated_with_marker() {
        let s = "x".repeat(MAX_OUTPUT_BYTES + 100);
        let out = truncate_output(s);
        assert!(out.len() < MAX_OUTPUT_BYTES + 100);
        assert!(out.ends_with("[truncated: sub-agent output exceeded 50 KiB]"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let mut s = "a".repeat(MAX_OUTPUT_BYTES - 1);
        s.push('€'); // 3-byte char straddling the cut point
        s.push_str(&"b".repeat(100));
        let out = truncate_output(s);
        assert!(out.is_char_boundary(out.len() - "\n... [truncated: sub-agent output exceeded 50 KiB]".len()));
    }
}

