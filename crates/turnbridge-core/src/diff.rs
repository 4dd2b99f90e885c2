// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Diff accumulator (`spec.md` §3, §4.6).
//!
//! Joins per-tool unified-diff fragments into one growing aggregate for the
//! current turn, reset at turn start. Kept as its own module — separate from
//! the translator that feeds it — because the monotonic-prefix property
//! (`spec.md` §8 #2) is cheaper to state and test against a single small
//! type than against the translator's full event-handling surface.

const FRAGMENT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Default, Clone)]
pub struct DiffAccumulator {
    fragments: Vec<String>,
}

impl DiffAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all fragments. Called at `agent_start` / `turn/start`.
    pub fn reset(&mut self) {
        self.fragments.clear();
    }

    pub fn push(&mut self, fragment: String) {
        self.fragments.push(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The aggregate payload emitted with `turn/diff/updated`: fragments
    /// joined by a blank line, in arrival order.
    pub fn joined(&self) -> String {
        self.fragments.join(FRAGMENT_SEPARATOR)
    }
}

/// Builds the unified-diff fragment for one completed file-change tool call,
/// or `None` if there is nothing to show (no diff body and not a fresh
/// creation with output text).
///
/// `is_create` distinguishes `write` (kind `create`) from `edit`; only a
/// `create` with no agent-supplied diff body gets the synthesized
/// full-addition form.
pub fn build_fragment(path: &str, diff_body: Option<&str>, is_create: bool, output_text: Option<&str>) -> Option<String> {
    if let Some(body) = diff_body {
        Some(format!("--- a/{path}\n+++ b/{path}\n{body}"))
    } else if is_create {
        output_text.map(|text| synthesize_full_addition(path, text))
    } else {
        None
    }
}

fn synthesize_full_addition(path: &str, text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let n = lines.len();
    let body = lines.iter().map(|l| format!("+{l}")).collect::<Vec<_>>().join("\n");
    format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{n} @@\n{body}")
}
