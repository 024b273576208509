// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime context for an agent session.
//!
//! This is separate from [`sven_config::AgentConfig`], which holds only
//! config-file fields.  [`AgentRuntimeContext`] carries values detected or
//! specified at runtime (project root, git/CI context, prompt overrides,
//! discovered skills/subagents/knowledge docs).

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// A discovered skill (a `SKILL.md` file under the standard search
/// hierarchy) available for the model to load via the `load_skill` tool.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    /// The slash-command form a user types to invoke the skill directly.
    pub command: String,
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub skill_md_path: PathBuf,
    pub skill_dir: PathBuf,
    pub content: String,
    pub sven_meta: Option<SvenSkillMeta>,
}

/// Skill metadata controlling how a skill is surfaced in the system prompt.
#[derive(Debug, Clone, Default)]
pub struct SvenSkillMeta {
    /// Bypass the prompt char budget and always include this skill.
    pub always: bool,
    /// Only usable as a direct `/command`; never offered to the model.
    pub user_invocable_only: bool,
}

/// A discovered subagent definition available for delegation.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub model: Option<String>,
    pub is_background: bool,
    pub readonly: bool,
}

/// A knowledge-base document discovered under the project's doc hierarchy.
#[derive(Debug, Clone)]
pub struct KnowledgeInfo {
    pub subsystem: String,
    pub files: Vec<String>,
    pub updated: Option<String>,
}

/// A snapshot list that can be atomically swapped out from under a running
/// agent — e.g. when the TUI's `/refresh` triggers rediscovery, the next
/// turn's `prompt_context()` call picks up the new snapshot via `get()`.
#[derive(Debug, Clone)]
pub struct Shared<T>(Arc<RwLock<Arc<[T]>>>);

impl<T> Shared<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(Arc::new(RwLock::new(Arc::from(items))))
    }

    /// Current snapshot. Cheap: clones the `Arc`, not the contents.
    pub fn get(&self) -> Arc<[T]> {
        self.0.read().expect("Shared lock poisoned").clone()
    }

    pub fn set(&self, items: Vec<T>) {
        *self.0.write().expect("Shared lock poisoned") = Arc::from(items);
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

pub type SharedSkills = Shared<SkillInfo>;
pub type SharedAgents = Shared<AgentInfo>;
pub type SharedKnowledge = Shared<KnowledgeInfo>;

/// Environment-detected context injected into an agent at construction time.
#[derive(Debug, Default, Clone)]
pub struct AgentRuntimeContext {
    /// Absolute path to the project root (found via `.git` walk-up).
    pub project_root: Option<PathBuf>,
    /// Pre-formatted git context block (branch, commit, dirty status).
    pub git_context_note: Option<String>,
    /// Pre-formatted CI environment context block.
    pub ci_context_note: Option<String>,
    /// Contents of the project context file (`.sven/context.md`, `AGENTS.md`, …).
    pub project_context_file: Option<String>,
    /// Text appended to the default system prompt (from `--append-system-prompt`).
    pub append_system_prompt: Option<String>,
    /// Full system prompt override (from `--system-prompt-file`).
    /// When set, replaces `AgentConfig::system_prompt` entirely.
    pub system_prompt_override: Option<String>,
    /// Skills discovered from the standard search hierarchy.
    ///
    /// Held as [`SharedSkills`] so a live refresh can swap in a new snapshot
    /// and the next agent turn automatically picks it up when rebuilding the
    /// system prompt.
    pub skills: SharedSkills,
    /// Subagents discovered from the standard search hierarchy.
    pub agents: SharedAgents,
    /// Knowledge-base documents discovered from the standard search hierarchy.
    pub knowledge: SharedKnowledge,
    /// Set when the knowledge-base index is older than the files it
    /// describes, warning the model that the summaries may be stale.
    pub knowledge_drift_note: Option<String>,
}
