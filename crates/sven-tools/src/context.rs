// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The explicit context handed to every [`crate::Tool::execute`] call.
//!
//! Nothing a tool needs reaches it through ambient/global state — cwd,
//! plan-mode, disabled tools, the scheduled-tool allowlist, external
//! credentials, and the scheduler callbacks are all bundled here and passed
//! by the caller (`sven-core`'s agent loop).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Credentials a tool may need to reach an external service on the user's
/// behalf (OAuth-style access/refresh tokens, or a bare API key).
#[derive(Debug, Clone, Default)]
pub struct ExternalCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub api_key: Option<String>,
}

/// Callbacks into the Tool-Call Scheduler, exposed to tools (e.g. a `schedule`
/// tool) without giving them direct access to the scheduler or its store.
#[async_trait]
pub trait SchedulerCallbacks: Send + Sync {
    async fn save_oauth_tokens(
        &self,
        service: &str,
        creds: ExternalCredentials,
    ) -> anyhow::Result<()>;

    async fn schedule_tool(
        &self,
        tool_name: &str,
        tool_input: Value,
        scheduled_for: chrono::DateTime<chrono::Utc>,
        recurrence: &str,
    ) -> anyhow::Result<String>;

    async fn list_scheduled_jobs(&self) -> anyhow::Result<Vec<Value>>;

    async fn cancel_scheduled_job(&self, job_id: &str) -> anyhow::Result<()>;

    async fn update_scheduled_job(
        &self,
        job_id: &str,
        tool_input: Value,
        scheduled_for: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()>;
}

/// Explicit execution context for one tool call.
///
/// Constructed fresh by the agent loop for every turn; cheap to clone
/// (everything heavier than a flag is behind an `Arc`).
#[derive(Clone)]
pub struct ToolContext {
    pub cwd: PathBuf,
    pub plan_mode: bool,
    pub disabled_tools: Arc<HashSet<String>>,
    pub scheduled_tool_allowlist: Arc<HashSet<String>>,
    pub credentials: Arc<HashSet<String>>,
    pub scheduler: Option<Arc<dyn SchedulerCallbacks>>,
}

impl ToolContext {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            plan_mode: false,
            disabled_tools: Arc::new(HashSet::new()),
            scheduled_tool_allowlist: Arc::new(HashSet::new()),
            credentials: Arc::new(HashSet::new()),
            scheduler: None,
        }
    }

    pub fn is_disabled(&self, tool_name: &str) -> bool {
        self.disabled_tools.contains(tool_name)
    }

    pub fn may_be_scheduled(&self, tool_name: &str) -> bool {
        self.scheduled_tool_allowlist.contains(tool_name)
    }

    /// Resolve `path` against this context's working directory if relative.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = std::path::Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd.join(p)
        }
    }
}
