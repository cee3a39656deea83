// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal static file server for projects with no server process of their
//! own (plain index.html sites).
//!
//! Serves GET requests rooted at one directory.  Dotfile access and any
//! path that resolves outside the root (including through symlinks) is
//! refused — the same hygiene the tool sandbox applies.

use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Serve `root` on `127.0.0.1:port` until the task is aborted.
pub async fn serve_static(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    debug!(root = %root.display(), port, "static server listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let root = root.clone();
        tokio::spawn(async move {
            let _ = handle_connection(stream, &root).await;
        });
    }
}

async fn handle_connection(mut stream: TcpStream, root: &Path) -> anyhow::Result<()> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let path = request
        .lines()
        .next()
        .and_then(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("GET"), Some(path)) => Some(path.to_string()),
                _ => None,
            }
        })
        .unwrap_or_default();

    if path.is_empty() {
        return respond(&mut stream, 400, "text/plain", b"bad request").await;
    }

    match resolve_request_path(root, &path) {
        Some(file) => match tokio::fs::read(&file).await {
            Ok(body) => {
                respond(&mut stream, 200, content_type(&file), &body).await
            }
            Err(_) => respond(&mut stream, 404, "text/plain", b"not found").await,
        },
        None => respond(&mut stream, 403, "text/plain", b"forbidden").await,
    }
}

/// Map a request path onto a file under `root`, or `None` when refused.
///
/// `/` maps to `index.html`; a directory path maps to its `index.html`.
fn resolve_request_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let path = request_path.split('?').next().unwrap_or(request_path);
    let trimmed = path.trim_start_matches('/');
    let rel = if trimmed.is_empty() { "index.html" } else { trimmed };

    let rel_path = Path::new(rel);
    for comp in rel_path.components() {
        match comp {
            Component::Normal(name) => {
                if name.to_string_lossy().starts_with('.') {
                    return None;
                }
            }
            // Any parent/absolute component is an escape attempt.
            _ => return None,
        }
    }

    let mut candidate = root.join(rel_path);
    if candidate.is_dir() {
        candidate = candidate.join("index.html");
    }

    // Symlink hygiene: the canonical target must stay under the root.
    let canon_root = root.canonicalize().ok()?;
    let canon = candidate.canonicalize().ok()?;
    if !canon.starts_with(&canon_root) {
        return None;
    }
    Some(canon)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

async fn respond(
    stream: &mut TcpStream,
    status: u16,
    ctype: &str,
    body: &[u8],
) -> anyhow::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Error",
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {ctype}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
