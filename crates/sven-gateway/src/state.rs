// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared gateway state: the transcript store, the live session registry,
//! and everything needed to construct a fresh [`AgentService`] for a
//! session the registry doesn't hold in memory yet.
//!
//! One `AgentService` lives per session for the lifetime of this process
//! (`sven_core::service` docs). A session created before a restart is
//! transparently reconstructed on first use: its transcript is reloaded
//! from the store via [`AgentService::resume`], but it picks up the
//! daemon's *current* default model rather than whatever model it was
//! originally created with, since the store only records a model name, not
//! a full provider configuration.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use sven_config::Config;
use sven_core::{Agent, AgentRuntimeContext, AgentService, TaskTool};
use sven_memory::{Store, StoreResult};
use sven_tools::{
    GrepTool, ListDirTool, ReadFileTool, ShellTool, TodoItem, TodoWriteTool, ToolEvent,
    ToolRegistry, WriteTool,
};

use crate::http::auth::{AsAuthState, AuthState};

pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    pub preferences_path: std::path::PathBuf,
    auth: AuthState,
    sessions: Mutex<HashMap<String, Arc<AgentService>>>,
}

impl AsAuthState for Arc<AppState> {
    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        config: Arc<Config>,
        preferences_path: std::path::PathBuf,
        auth: AuthState,
    ) -> Self {
        Self {
            store,
            config,
            preferences_path,
            auth,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// `POST /api/sessions`: build a fresh agent against the daemon's
    /// default model and register it. Returns the store row alongside the
    /// live handle since `AgentService::session_id` is the in-memory
    /// agent's own id, not the store's primary key the gateway routes on.
    pub async fn create_session(
        &self,
        project_path: &str,
    ) -> anyhow::Result<(Arc<AgentService>, sven_memory::types::Session)> {
        let model: Arc<dyn sven_model::ModelProvider> = Arc::from(sven_model::from_config(&self.config.model)?);
        let (service, row) = build_session(self.store.clone(), project_path, model, &self.config).await?;
        let service = Arc::new(service);
        self.sessions.lock().await.insert(row.id.clone(), Arc::clone(&service));
        Ok((service, row))
    }

    /// Resolve a session id or ≥6-char prefix to its live `AgentService`,
    /// reconstructing a dormant one from the store if it is not already
    /// registered in this process.
    pub async fn get_session(&self, id_or_prefix: &str) -> StoreResult<Arc<AgentService>> {
        let row = self.store.find_session_by_prefix(id_or_prefix).await?;

        if let Some(existing) = self.sessions.lock().await.get(&row.id) {
            return Ok(Arc::clone(existing));
        }

        let model: Arc<dyn sven_model::ModelProvider> = match sven_model::from_config(&self.config.model) {
            Ok(m) => Arc::from(m),
            Err(e) => return Err(sven_memory::StoreError::Internal(e.to_string())),
        };
        let agent_config = Arc::new(self.config.agent.clone());
        let (tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);
        let tools = Arc::new(build_registry(&self.config, model.clone(), agent_config.clone(), tool_tx));
        let mode_lock = Arc::new(Mutex::new(self.config.agent.default_mode));
        let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;

        let agent = Agent::new(
            model,
            tools,
            agent_config,
            AgentRuntimeContext::default(),
            mode_lock,
            tool_rx,
            max_ctx,
        );
        let service = AgentService::new(agent, Some(self.store.clone()), row.id.clone());
        service
            .resume()
            .await
            .map_err(|e| sven_memory::StoreError::Internal(e.to_string()))?;

        let service = Arc::new(service);
        self.sessions.lock().await.insert(row.id.clone(), Arc::clone(&service));
        Ok(service)
    }

    /// `DELETE /api/sessions/{id}`: drop the live handle (if any) and the
    /// store row.
    pub async fn delete_session(&self, id_or_prefix: &str) -> StoreResult<()> {
        let row = self.store.find_session_by_prefix(id_or_prefix).await?;
        self.sessions.lock().await.remove(&row.id);
        self.store.delete_session(&row.id).await
    }
}

/// Builds the tool registry a live session exposes to its model: the
/// filesystem/search primitives plus `task` for sub-agent delegation.
/// Mirrors `sven_scheduler::EphemeralAgentRunner::build_registry`, with
/// `task` added since live sessions (unlike scheduled ticks) are allowed to
/// recurse into sub-agents.
fn build_registry(
    config: &Config,
    model: Arc<dyn sven_model::ModelProvider>,
    agent_config: Arc<sven_config::AgentConfig>,
    todo_event_tx: mpsc::Sender<ToolEvent>,
) -> ToolRegistry {
    let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool);
    reg.register(ListDirTool);
    reg.register(GrepTool);
    reg.register(WriteTool);
    reg.register(ShellTool { timeout_secs: config.tools.timeout_secs });
    reg.register(TodoWriteTool::new(todos, todo_event_tx));
    reg.register(TaskTool::new(model, Arc::new((*config).clone()), agent_config, Arc::new(AtomicUsize::new(0))));
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::token::RawToken;

    fn test_auth() -> AuthState {
        AuthState::new(RawToken::generate().into_stored(), 60, 10)
    }

    fn test_state() -> AppState {
        let store = Arc::new(Store::open_in_memory().unwrap());
        AppState::new(store, Arc::new(Config::default()), std::path::PathBuf::from("/tmp/prefs.yaml"), test_auth())
    }

    #[tokio::test]
    async fn create_session_registers_a_live_handle() {
        let state = test_state();
        let (service, row) = state.create_session("/tmp/project").await.unwrap();

        let looked_up = state.get_session(&row.id).await.unwrap();
        assert!(Arc::ptr_eq(&service, &looked_up), "get_session must return the same live handle just created");
    }

    #[tokio::test]
    async fn get_session_resolves_by_unambiguous_prefix() {
        let state = test_state();
        let (_service, row) = state.create_session("/tmp/project").await.unwrap();

        let prefix = &row.id[..8];
        let looked_up = state.get_session(prefix).await;
        assert!(looked_up.is_ok(), "a long-enough prefix should resolve");
    }

    #[tokio::test]
    async fn get_session_unknown_id_errors() {
        let state = test_state();
        let result = state.get_session("0123456789abcdef").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_session_drops_the_live_handle_and_store_row() {
        let state = test_state();
        let (_service, row) = state.create_session("/tmp/project").await.unwrap();

        state.delete_session(&row.id).await.unwrap();

        let result = state.get_session(&row.id).await;
        assert!(result.is_err(), "session should be gone from both the registry and the store");
    }

    #[tokio::test]
    async fn get_session_reconstructs_a_dormant_session_from_the_store() {
        // Two AppState instances sharing one store simulate a process restart:
        // the second state's registry starts empty and must rebuild the
        // AgentService from the store row alone.
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Arc::new(Config::default());

        let state1 = AppState::new(Arc::clone(&store), Arc::clone(&config), std::path::PathBuf::from("/tmp/prefs.yaml"), test_auth());
        let (_service, row) = state1.create_session("/tmp/project").await.unwrap();

        let state2 = AppState::new(Arc::clone(&store), config, std::path::PathBuf::from("/tmp/prefs.yaml"), test_auth());
        let reconstructed = state2.get_session(&row.id).await;
        assert!(reconstructed.is_ok(), "a session not in this process's registry must be rebuilt from the store");
    }
}

async fn build_session(
    store: Arc<Store>,
    project_path: &str,
    model: Arc<dyn sven_model::ModelProvider>,
    config: &Config,
) -> anyhow::Result<(AgentService, sven_memory::types::Session)> {
    let agent_config = Arc::new(config.agent.clone());
    let (tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);
    let tools = Arc::new(build_registry(config, model.clone(), agent_config.clone(), tool_tx));
    let mode_lock = Arc::new(Mutex::new(config.agent.default_mode));
    let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;

    AgentService::create(
        store,
        project_path,
        model,
        tools,
        agent_config,
        AgentRuntimeContext::default(),
        mode_lock,
        tool_rx,
        max_ctx,
    )
    .await
}
