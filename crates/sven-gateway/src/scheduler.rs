// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wires the process-wide tool-call scheduler into the daemon: builds the
//! tool registry scheduled jobs are allowed to reach, the per-tick
//! [`ContextFactory`], and the sub-agent runner `agent_task` jobs use, then
//! spawns the tick loop on the current runtime.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use sven_config::Config;
use sven_memory::Store;
use sven_scheduler::{ContextFactory, EphemeralAgentRunner, Scheduler, SchedulerHandle};
use sven_tools::{
    GrepTool, ListDirTool, ReadFileTool, ShellTool, TodoItem, TodoWriteTool, ToolContext,
    ToolEvent, ToolRegistry, WriteTool,
};
use tokio::sync::Mutex;

/// Builds a fresh [`ToolContext`] rooted at the daemon's working directory
/// for every tick, scoped to the configured scheduled-tool allowlist.
struct DaemonContextFactory {
    cwd: std::path::PathBuf,
    allowlist: Arc<HashSet<String>>,
}

impl ContextFactory for DaemonContextFactory {
    fn build(&self) -> ToolContext {
        let mut ctx = ToolContext::new(self.cwd.clone());
        ctx.scheduled_tool_allowlist = self.allowlist.clone();
        ctx
    }
}

fn build_registry(config: &Config) -> ToolRegistry {
    let (tool_tx, _tool_rx) = mpsc::channel::<ToolEvent>(1);
    let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool);
    reg.register(ListDirTool);
    reg.register(GrepTool);
    reg.register(WriteTool);
    reg.register(ShellTool { timeout_secs: config.tools.timeout_secs });
    reg.register(TodoWriteTool::new(todos, tool_tx));
    reg
}

/// Spawn the scheduler's tick loop against `store`, using `config` for both
/// the tool registry's shell timeout and the default model sub-agent jobs
/// run against. Returns a handle the caller must `stop()` on shutdown.
pub fn spawn(store: Store, config: &Config) -> anyhow::Result<SchedulerHandle> {
    let model: Arc<dyn sven_model::ModelProvider> = Arc::from(sven_model::from_config(&config.model)?);
    let agent_config = Arc::new(config.agent.clone());
    let runner = Arc::new(EphemeralAgentRunner::new(model, Arc::new(config.clone()), agent_config));

    let allowlist: Arc<HashSet<String>> = Arc::new(config.scheduler.allowlist.iter().cloned().collect());
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let context_factory = Arc::new(DaemonContextFactory { cwd, allowlist });

    let tools = Arc::new(build_registry(config));
    let scheduler = Scheduler::new(store, tools, context_factory, runner, config.scheduler.clone());
    Ok(scheduler.spawn())
}
