// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model-alias resolver: maps friendly names to a `(provider, model_id)` pair.
//!
//! A closed map, not runtime-pluggable — new aliases are added here, not
//! loaded from user config, mirroring how [`crate::registry`] treats the
//! driver list as a fixed table.

/// A friendly name and the canonical `(provider, model_id)` it resolves to.
struct Alias {
    friendly: &'static str,
    provider: &'static str,
    model_id: &'static str,
}

static ALIASES: &[Alias] = &[
    Alias { friendly: "claude-sonnet", provider: "anthropic", model_id: "claude-sonnet-4-6" },
    Alias { friendly: "claude-opus", provider: "anthropic", model_id: "claude-opus-4-6" },
    Alias { friendly: "claude-haiku", provider: "anthropic", model_id: "claude-haiku-4-6" },
    Alias { friendly: "gpt4o", provider: "openai", model_id: "gpt-4o" },
    Alias { friendly: "gpt4o-mini", provider: "openai", model_id: "gpt-4o-mini" },
    Alias { friendly: "gemini-pro", provider: "google", model_id: "gemini-1.5-pro" },
    Alias { friendly: "command-r-plus", provider: "cohere", model_id: "command-r-plus" },
];

/// The model a provider resolves to when the user gives only the provider
/// name (e.g. `model.provider = "anthropic"` with no `model.id`).
fn default_model_id_for_provider(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("claude-sonnet-4-6"),
        "openai" => Some("gpt-4o"),
        "google" => Some("gemini-1.5-pro"),
        "cohere" => Some("command-r-plus"),
        "mock" => Some("mock-model"),
        _ => None,
    }
}

/// Resolve a user-supplied spec — a friendly alias, a bare catalog model id,
/// or a `(provider, model_id)` pair that's already canonical — into the
/// canonical `(provider, model_id)` the rest of the daemon operates on.
///
/// `provider_hint` is the provider the user explicitly configured, if any.
/// When `model_name` is empty, the provider's default model is returned.
pub fn resolve(provider_hint: Option<&str>, model_name: &str) -> Option<(String, String)> {
    if model_name.is_empty() {
        let provider = provider_hint?;
        let model_id = default_model_id_for_provider(provider)?;
        return Some((provider.to_string(), model_id.to_string()));
    }

    if let Some(alias) = ALIASES.iter().find(|a| a.friendly == model_name) {
        return Some((alias.provider.to_string(), alias.model_id.to_string()));
    }

    if let Some(entry) = crate::catalog::lookup_by_model_name(model_name) {
        return Some((entry.provider, entry.id));
    }

    // Unknown name: if the caller already told us the provider, trust it and
    // pass the model id straight through (covers self-hosted/custom models
    // that will never appear in the static catalog).
    provider_hint.map(|p| (p.to_string(), model_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_alias() {
        let (provider, model_id) = resolve(None, "claude-sonnet").unwrap();
        assert_eq!(provider, "anthropic");
        assert_eq!(model_id, "claude-sonnet-4-6");
    }

    #[test]
    fn resolves_bare_catalog_id() {
        let (provider, model_id) = resolve(None, "gpt-4o").unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(model_id, "gpt-4o");
    }

    #[test]
    fn resolves_provider_default_when_model_name_empty() {
        let (provider, model_id) = resolve(Some("anthropic"), "").unwrap();
        assert_eq!(provider, "anthropic");
        assert_eq!(model_id, "claude-sonnet-4-6");
    }

    #[test]
    fn passes_through_unknown_model_with_explicit_provider() {
        let (provider, model_id) = resolve(Some("ollama"), "llama3-custom").unwrap();
        assert_eq!(provider, "ollama");
        assert_eq!(model_id, "llama3-custom");
    }

    #[test]
    fn returns_none_when_unresolvable() {
        assert!(resolve(None, "").is_none());
    }
}
