// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The tick loop: poll the store for due jobs, dispatch each through the
//! Tool Executor (or an ephemeral agent run), record the outcome, and
//! reschedule recurrences.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use sven_config::SchedulerConfig;
use sven_memory::{ScheduledToolJob, Store, StoreResult};
use sven_tools::{ToolCall, ToolContext, ToolRegistry};

use crate::agent_task::AgentTaskRunner;

/// Builds a fresh [`ToolContext`] for one job dispatch. Invoked once per
/// job, every tick, so credentials and cwd are re-read rather than cached
/// across the scheduler's lifetime.
pub trait ContextFactory: Send + Sync {
    fn build(&self) -> ToolContext;
}

enum SchedulerCommand {
    Stop,
}

/// Handle to a running scheduler loop. Dropping it does not stop the loop —
/// call [`stop`](Self::stop) explicitly.
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn stop(&self) {
        let _ = self.tx.send(SchedulerCommand::Stop).await;
    }
}

pub struct Scheduler {
    store: Store,
    tools: Arc<ToolRegistry>,
    context_factory: Arc<dyn ContextFactory>,
    agent_runner: Arc<dyn AgentTaskRunner>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Store,
        tools: Arc<ToolRegistry>,
        context_factory: Arc<dyn ContextFactory>,
        agent_runner: Arc<dyn AgentTaskRunner>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            tools,
            context_factory,
            agent_runner,
            config,
        }
    }

    /// Spawn the tick loop on the current Tokio runtime and return a handle
    /// to stop it. Never holds any agent's session mutex — each job gets its
    /// own fresh `ToolContext` or ephemeral `Agent`.
    pub fn spawn(self) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run(rx));
        SchedulerHandle { tx }
    }

    async fn run(self, mut cmd_rx: mpsc::Receiver<SchedulerCommand>) {
        let period = StdDuration::from_secs(self.config.tick_period_secs.max(1));
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_tick().await;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Stop) | None => break,
                    }
                }
            }
        }
        debug!("scheduler: loop stopped");
    }

    pub(crate) async fn run_tick(&self) {
        let due = match self
            .store
            .due_scheduled_jobs(Utc::now(), self.config.max_due_jobs)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "scheduler: failed to poll due jobs");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "scheduler: dispatching due jobs");

        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut handles = Vec::with_capacity(due.len());
        for job in due {
            let limiter = Arc::clone(&limiter);
            let store = self.store.clone();
            let tools = Arc::clone(&self.tools);
            let ctx_factory = Arc::clone(&self.context_factory);
            let agent_runner = Arc::clone(&self.agent_runner);
            let allowlist = self.config.allowlist.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore is never closed");
                dispatch_one(
                    &store,
                    tools.as_ref(),
                    ctx_factory.as_ref(),
                    agent_runner.as_ref(),
                    &allowlist,
                    job,
                )
                .await;
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }
}

const AGENT_TASK_TOOL_NAME: &str = "agent_task";

async fn dispatch_one(
    store: &Store,
    tools: &ToolRegistry,
    ctx_factory: &dyn ContextFactory,
    agent_runner: &dyn AgentTaskRunner,
    allowlist: &[String],
    job: ScheduledToolJob,
) {
    let outcome = if job.tool_name == AGENT_TASK_TOOL_NAME {
        run_agent_task(agent_runner, &job).await
    } else if !allowlist.iter().any(|t| t == &job.tool_name) {
        Err(format!(
            "tool not in scheduled allowlist: {}",
            job.tool_name
        ))
    } else {
        let ctx = ctx_factory.build();
        let call = ToolCall {
            id: job.id.clone(),
            name: job.tool_name.clone(),
            args: job.tool_input.clone(),
        };
        let output = tools.execute(&call, &ctx).await;
        if output.is_error {
            Err(output.content)
        } else {
            Ok(output.content)
        }
    };

    let record = match outcome {
        Ok(result) => complete_success(store, &job, &result).await,
        Err(err) => {
            warn!(job_id = %job.id, tool = %job.tool_name, error = %err, "scheduler: job failed");
            complete_failure(store, &job, &err).await
        }
    };
    if let Err(e) = record {
        error!(job_id = %job.id, error = %e, "scheduler: failed to persist job outcome");
    }
}

async fn run_agent_task(
    agent_runner: &dyn AgentTaskRunner,
    job: &ScheduledToolJob,
) -> Result<String, String> {
    let prompt = job
        .tool_input
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "agent_task job missing 'prompt'".to_string())?;
    agent_runner.run(prompt).await.map_err(|e| e.to_string())
}

async fn complete_success(store: &Store, job: &ScheduledToolJob, result: &str) -> StoreResult<()> {
    store.mark_scheduled_job_succeeded(&job.id, result).await?;
    if let Some(interval) = job.recurrence.interval() {
        store
            .reschedule_scheduled_job(&job.id, job.scheduled_for + interval)
            .await?;
    }
    Ok(())
}

/// On failure, a recurring job is advanced straight to its next slot
/// (skipping the failed one) rather than left `failed` — matching the spec's
/// "reschedule recurring with the next slot". The store has no call that
/// records an error message *and* reschedules in one write, so for
/// recurring jobs the failure is visible only via this module's `warn!` log;
/// the job's durable `error` field only ever reflects a terminal (`once`)
/// failure.
async fn complete_failure(store: &Store, job: &ScheduledToolJob, error: &str) -> StoreResult<()> {
    match job.recurrence.interval() {
        None => store.mark_scheduled_job_failed(&job.id, error).await,
        Some(interval) => {
            store
                .reschedule_scheduled_job(&job.id, job.scheduled_for + interval)
                .await
        }
    }
}
