// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming removal of "thinking" spans from model output.
//!
//! Some model servers emit chain-of-thought as plain text wrapped in
//! `<think>…</think>`-style markup instead of a separate reasoning channel.
//! Because the markup can be split across any delta boundary, the stripper
//! holds back up to [`LOOKAHEAD`] trailing characters that could still turn
//! into a tag, and only forwards text that is guaranteed to be outside a
//! thinking span.

/// Maximum holdback. `</reasoning>` is the longest recognized tag (12 chars).
const LOOKAHEAD: usize = 12;

/// Recognized span delimiters as (open, close) pairs.  `<|think|>` uses the
/// same token on both sides.
const SPANS: &[(&str, &str)] = &[
    ("<thinking>", "</thinking>"),
    ("<think>", "</think>"),
    ("<reasoning>", "</reasoning>"),
    ("<|think|>", "<|think|>"),
];

/// Incremental think-span stripper.
///
/// Feed deltas with [`push`](Self::push); each call returns the text that is
/// now known to be visible.  Call [`finish`](Self::finish) after the last
/// delta — an unterminated span is discarded entirely, while held-back text
/// that never completed a tag is released.
#[derive(Debug, Default)]
pub struct ThinkStripper {
    buf: String,
    /// `Some(close_tag)` while inside a span.
    close: Option<&'static str>,
}

impl ThinkStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one content delta and return the newly safe visible text.
    pub fn push(&mut self, delta: &str) -> String {
        self.buf.push_str(delta);
        let mut out = String::new();

        loop {
            if let Some(close) = self.close {
                match self.buf.find(close) {
                    Some(pos) => {
                        // Span closed: drop everything through the close tag.
                        self.buf.drain(..pos + close.len());
                        self.close = None;
                    }
                    None => {
                        // Still inside.  Keep only a tail that could be the
                        // start of the close tag; everything else is span
                        // content and is dropped now.
                        let keep = partial_suffix_len(&self.buf, close);
                        let cut = self.buf.len() - keep;
                        self.buf.drain(..cut);
                        break;
                    }
                }
            } else {
                match scan_for_open(&self.buf) {
                    Scan::Open { at, span } => {
                        out.push_str(&self.buf[..at]);
                        let open_len = SPANS[span].0.len();
                        self.buf.drain(..at + open_len);
                        self.close = Some(SPANS[span].1);
                    }
                    Scan::PartialTail { at } => {
                        out.push_str(&self.buf[..at]);
                        self.buf.drain(..at);
                        break;
                    }
                    Scan::Clear => {
                        out.push_str(&self.buf);
                        self.buf.clear();
                        break;
                    }
                }
            }
        }

        debug_assert!(self.buf.len() <= LOOKAHEAD);
        out
    }

    /// Flush at end of stream.
    ///
    /// An unterminated span (open tag without its close) is eliminated; a
    /// held-back partial that never became a tag is ordinary text.
    pub fn finish(&mut self) -> String {
        if self.close.is_some() {
            self.buf.clear();
            self.close = None;
            return String::new();
        }
        std::mem::take(&mut self.buf)
    }

    /// One-shot convenience over a complete string.
    pub fn strip(text: &str) -> String {
        let mut s = Self::new();
        let mut out = s.push(text);
        out.push_str(&s.finish());
        out
    }
}

enum Scan {
    /// A complete open tag of `SPANS[span]` begins at byte offset `at`.
    Open { at: usize, span: usize },
    /// A proper prefix of some open tag starts at `at` and runs to the end
    /// of the buffer — hold it back until more input arrives.
    PartialTail { at: usize },
    /// No tag and no possible tag prefix: the whole buffer is visible.
    Clear,
}

fn scan_for_open(buf: &str) -> Scan {
    for (at, ch) in buf.char_indices() {
        if ch != '<' {
            continue;
        }
        let rest = &buf[at..];
        for (span, (open, _)) in SPANS.iter().enumerate() {
            if rest.starts_with(open) {
                return Scan::Open { at, span };
            }
        }
        // A prefix shorter than the tag, reaching the end of the buffer,
        // might still complete on the next delta.
        if rest.len() < LOOKAHEAD && SPANS.iter().any(|(open, _)| open.starts_with(rest)) {
            return Scan::PartialTail { at };
        }
    }
    Scan::Clear
}

/// Length of the longest proper prefix of `tag` that `buf` ends with.
fn partial_suffix_len(buf: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(buf.len());
    for n in (1..=max).rev() {
        if buf.ends_with(&tag[..n]) {
            return n;
        }
    }
    0
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
