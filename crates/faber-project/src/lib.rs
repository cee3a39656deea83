// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Project runtime: subprocess supervision, filesystem watching, and the
//! built-in static server.
//!
//! The supervisor and the watch hub are process-wide singletons in practice;
//! both are plain structs here so alternate back-ends can be injected where
//! an `Arc` of them is consumed.

mod ring;
mod static_server;
pub mod supervisor;
pub mod watcher;

pub use ring::RingBuffer;
pub use static_server::serve_static;
pub use supervisor::{ProjectEvent, ProjectStatus, StartPlan, Supervisor};
pub use watcher::{FileChangeEvent, WatchHub, WatchSubscription};
