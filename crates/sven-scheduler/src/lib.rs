// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-Call Scheduler: a single process-wide loop that polls the
//! transcript store for due jobs and dispatches each one, bounded in
//! concurrency, without ever touching a live session's agent mutex.

mod agent_task;
mod scheduler;

pub use agent_task::{AgentTaskRunner, EphemeralAgentRunner};
pub use scheduler::{ContextFactory, Scheduler, SchedulerHandle};
