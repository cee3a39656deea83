// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Plan detection and approval parsing.

use std::sync::OnceLock;

use regex::Regex;

/// Exact prefix the UI sends when the user approves a previously shown plan.
const APPROVAL_PREFIX: &str = "Approved. Please implement the following plan:";

/// If `text` is a structured plan approval, return the plan body.
pub fn extract_approved_plan(text: &str) -> Option<&str> {
    let rest = text.trim_start().strip_prefix(APPROVAL_PREFIX)?;
    let body = rest.trim_start_matches(['\n', '\r', ' ']);
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

/// Prose-level approval used by the dual loop ("approved", "go ahead", …).
/// Deliberately anchored to the start of the message; the false-positive
/// surface of a mid-sentence "do it" is too large.
pub fn is_prose_approval(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(approved|approve|yes,?\s*(please\s+)?implement|go ahead|lgtm|ship it|do it|proceed)\b",
        )
        .expect("approval pattern")
    })
    .is_match(text)
}

fn step_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]\s+|[-*]\s+)(.+)$").expect("step pattern"))
}

/// Extract the numbered/bulleted steps of a plan body, in order.
pub fn extract_steps(plan: &str) -> Vec<String> {
    plan.lines()
        .filter_map(|line| {
            step_line()
                .captures(line)
                .map(|c| c[1].trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// A run of at least two numbered/bulleted lines reads as a plan.
pub fn detect_plan(content: &str) -> bool {
    let mut run = 0;
    for line in content.lines() {
        if step_line().is_match(line) {
            run += 1;
            if run >= 2 {
                return true;
            }
        } else if !line.trim().is_empty() {
            run = 0;
        }
    }
    false
}

/// Build-mode prose that reads as an explanation instead of action.
/// Used to nudge the model toward tools.
pub fn looks_like_explanation(text: &str) -> bool {
    const MARKERS: &[&str] = &[
        "i'll ",
        "i will ",
        "let me ",
        "would you like",
        "shall i",
        "should i",
        "here's how",
        "you can ",
        "you could ",
    ];
    let lower = text.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
