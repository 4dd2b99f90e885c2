// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model registry (`spec.md` §4.4).
//!
//! Composite identifiers (`<provider>/<inner-model-id>`) are what the bridge
//! advertises outward; this module is the one place that joins and splits
//! them, and the one place that guesses a provider from a bare legacy model
//! name when the client doesn't supply the composite form.
//!
//! Grounded on `sven_model::catalog`'s `lookup`/`lookup_by_model_name`
//! functions, generalized from a static catalog to a registry populated
//! lazily from the agent's own `get_available_models` response, plus the
//! prefix-guessing fallback the spec calls for.

use std::collections::HashMap;

pub const COMPOSITE_SEPARATOR: char = '/';

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub provider: String,
    pub model_id: String,
    pub display_name: String,
    pub reasoning_capable: bool,
    pub default_reasoning: String,
}

impl ModelEntry {
    pub fn composite(&self) -> String {
        format!("{}{}{}", self.provider, COMPOSITE_SEPARATOR, self.model_id)
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    /// Keyed by composite identifier.
    entries: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the registry contents with a freshly enumerated set,
    /// discarding anything guessed in a prior session (per §4.4 the
    /// enumerated set is authoritative once it exists).
    pub fn populate(&mut self, entries: Vec<ModelEntry>) {
        self.entries = entries.into_iter().map(|e| (e.composite(), e)).collect();
    }

    pub fn entries(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.values()
    }

    pub fn get(&self, composite: &str) -> Option<&ModelEntry> {
        self.entries.get(composite)
    }

    /// Resolves a client-supplied model identifier — composite or legacy —
    /// into `(provider, inner_model_id)`. A composite id is simply split.
    /// A bare legacy id is looked up by inner model id across the known
    /// entries; if none match, a provider is guessed from well-known
    /// name prefixes and recorded in the registry so the guess is stable
    /// for the rest of the session (§4.4 "recorded for the remainder of
    /// the session").
    pub fn resolve(&mut self, id: &str) -> (String, String) {
        if let Some((provider, model_id)) = id.split_once(COMPOSITE_SEPARATOR) {
            return (provider.to_string(), model_id.to_string());
        }

        if let Some(entry) = self.entries.values().find(|e| e.model_id == id) {
            return (entry.provider.clone(), entry.model_id.clone());
        }

        let provider = guess_provider(id);
        let entry = ModelEntry {
            provider: provider.to_string(),
            model_id: id.to_string(),
            display_name: id.to_string(),
            reasoning_capable: false,
            default_reasoning: "default".to_string(),
        };
        let composite = entry.composite();
        self.entries.entry(composite).or_insert(entry);
        (provider.to_string(), id.to_string())
    }
}

fn guess_provider(model_id: &str) -> &'static str {
    if model_id.is_empty() {
        return "anthropic";
    }
    let lower = model_id.to_lowercase();
    if lower.starts_with("claude") {
        "anthropic"
    } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
        "openai"
    } else if lower.starts_with("gemini") {
        "google"
    } else if lower.starts_with("mistral") || lower.starts_with("codestral") || lower.starts_with("devstral") {
        "mistral"
    } else {
        "opencode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(provider: &str, model_id: &str) -> ModelEntry {
        ModelEntry {
            provider: provider.into(),
            model_id: model_id.into(),
            display_name: model_id.into(),
            reasoning_capable: false,
            default_reasoning: "default".into(),
        }
    }

    #[test]
    fn composite_round_trips_through_resolve() {
        let mut reg = ModelRegistry::new();
        reg.populate(vec![entry("anthropic", "claude-sonnet-4-20250514")]);
        let composite = reg.entries().next().unwrap().composite();
        let (provider, model_id) = reg.resolve(&composite);
        assert_eq!(provider, "anthropic");
        assert_eq!(model_id, "claude-sonnet-4-20250514");
        assert_eq!(reg.get(&composite).unwrap().model_id, model_id);
    }

    #[test]
    fn legacy_bare_id_is_looked_up_against_known_entries() {
        let mut reg = ModelRegistry::new();
        reg.populate(vec![entry("openai", "gpt-5")]);
        let (provider, model_id) = reg.resolve("gpt-5");
        assert_eq!(provider, "openai");
        assert_eq!(model_id, "gpt-5");
    }

    #[test]
    fn unknown_bare_id_is_guessed_and_recorded() {
        let mut reg = ModelRegistry::new();
        let (provider, _) = reg.resolve("claude-opus-9000");
        assert_eq!(provider, "anthropic");
        assert!(reg.get("anthropic/claude-opus-9000").is_some());

        // Guess is stable across repeated resolution in the same session.
        let (provider_again, _) = reg.resolve("claude-opus-9000");
        assert_eq!(provider_again, "anthropic");
    }

    #[test]
    fn prefix_table_covers_each_named_provider() {
        assert_eq!(guess_provider("gpt-5"), "openai");
        assert_eq!(guess_provider("o1-preview"), "openai");
        assert_eq!(guess_provider("o3-mini"), "openai");
        assert_eq!(guess_provider("gemini-2.0-flash"), "google");
        assert_eq!(guess_provider("mistral-large"), "mistral");
        assert_eq!(guess_provider("codestral-latest"), "mistral");
        assert_eq!(guess_provider("devstral-small"), "mistral");
        assert_eq!(guess_provider("llama-3"), "opencode");
    }

    #[test]
    fn composite_with_slash_is_split_without_registry_lookup() {
        let mut reg = ModelRegistry::new();
        let (provider, model_id) = reg.resolve("openai/gpt-5");
        assert_eq!(provider, "openai");
        assert_eq!(model_id, "gpt-5");
    }
}
