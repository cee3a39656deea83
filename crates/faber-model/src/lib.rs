// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model stream client for OpenAI-compatible chat completion endpoints.
//!
//! Opens a streaming `/v1/chat/completions` call, demultiplexes SSE frames
//! into [`ResponseEvent`]s (text deltas + fragmented tool-call deltas), and
//! provides the [`StreamCollector`] that assembles a turn while filtering
//! "thinking" spans out of the visible text.

mod client;
mod collector;
pub mod error;
pub mod mock;
mod think;
mod types;

pub use client::{probe_models, OpenAiCompatClient};
pub use collector::{StreamCollector, TurnOutcome};
pub use think::ThinkStripper;
pub use types::{
    CompletionRequest, FunctionCall, Message, MessageContent, ModelProvider, ResponseEvent,
    ResponseStream, Role, ToolCallRequest, ToolSchema,
};
