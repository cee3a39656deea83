// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Engine-level integration tests: subsystem wiring, event multiplexing,
//! and the supervisor lifecycle against real subprocesses.

use std::sync::Arc;
use std::time::Duration;

use faber::{Engine, EngineEvent, MemoryStore};
use faber_config::Settings;
use faber_project::{ProjectEvent, ProjectStatus};

fn engine() -> Engine {
    Engine::new(Settings::default(), Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn subscribe_project_delivers_file_changes() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine();
    let mut events = engine.subscribe_project(dir.path()).unwrap();

    std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut saw_change = false;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Some(EngineEvent::FileChange(change))) => {
                assert_eq!(change.filename, "app.js");
                saw_change = true;
                break;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_change, "no file_change event arrived");
}

#[tokio::test]
async fn supervisor_port_detection_reaches_subscribers() {
    let dir = tempfile::TempDir::new().unwrap();
    // A project whose script prints a Vite-style local URL.
    std::fs::write(
        dir.path().join("main.py"),
        "print('  Local: http://localhost:5173/')\nimport time\ntime.sleep(60)\n",
    )
    .unwrap();

    let engine = engine();
    let mut events = engine.subscribe_project(dir.path()).unwrap();
    engine.supervisor().start(dir.path()).await.unwrap();

    let mut saw_running = false;
    let mut saw_port = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(2500);
    while tokio::time::Instant::now() < deadline && !(saw_running && saw_port) {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Some(EngineEvent::Project(ProjectEvent::Status { status, .. }))) => {
                if status == ProjectStatus::Running {
                    saw_running = true;
                }
            }
            Ok(Some(EngineEvent::Project(ProjectEvent::PortChanged { port, .. }))) => {
                if port == 5173 {
                    saw_port = true;
                }
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_running, "no running status event");
    assert!(saw_port, "no port_changed event for 5173");

    let (status, port) = engine.supervisor().status(dir.path()).await.unwrap();
    assert_eq!(status, ProjectStatus::Running);
    assert_eq!(port, 5173);

    engine.supervisor().stop(dir.path()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let (status, _) = engine.supervisor().status(dir.path()).await.unwrap();
    assert_eq!(status, ProjectStatus::Stopped);
}

#[tokio::test]
async fn supervisor_serves_static_projects() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>static</h1>").unwrap();

    let engine = engine();
    let port = engine.supervisor().start(dir.path()).await.unwrap();

    // The built-in static server should answer on the allocated port.
    let body = http_get(&format!("http://127.0.0.1:{port}/")).await;
    assert!(body.contains("<h1>static</h1>"), "{body}");

    engine.supervisor().stop(dir.path()).await.unwrap();
}

/// Tiny HTTP GET over a raw TCP stream; keeps the test free of extra deps.
async fn http_get(url: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let rest = url.strip_prefix("http://").unwrap();
    let (host, path) = rest.split_once('/').unwrap();
    let mut stream = tokio::net::TcpStream::connect(host).await.unwrap();
    stream
        .write_all(format!("GET /{path} HTTP/1.1\r\nHost: {host}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn chunks_serialize_for_sse_transport() {
    // The transport contract: each chunk is one JSON object with a `type`
    // tag; `done` closes the stream.
    let chunk = faber_core::StreamChunk::IterationStatus {
        iteration: 1,
        max_iterations: 25,
        phase: "thinking".into(),
    };
    let json = serde_json::to_string(&chunk).unwrap();
    assert!(json.contains("\"type\":\"iteration_status\""));
    assert!(json.contains("\"max_iterations\":25"));

    let done = serde_json::to_string(&faber_core::StreamChunk::Done).unwrap();
    assert_eq!(done, "{\"type\":\"done\"}");
}

#[tokio::test]
async fn watcher_reference_counting_survives_engine_events() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine();
    {
        let _a = engine.subscribe_project(dir.path()).unwrap();
        let _b = engine.subscribe_project(dir.path()).unwrap();
        assert_eq!(engine.watch_hub().watcher_count(), 1);
    }
    // Receivers dropped → forwarder tasks end → watcher released.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(engine.watch_hub().watcher_count(), 0);
}
