// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Textual "screenshot" of the running project.
///
/// Fetches the project's root URL from the supervisor-reported port and
/// describes the served HTML structurally — not a pixel capture, but enough
/// for the model to verify that its changes are actually being served.
pub struct TakeScreenshotTool;

#[async_trait]
impl Tool for TakeScreenshotTool {
    fn name(&self) -> &str {
        "take_screenshot"
    }

    fn description(&self) -> &str {
        "Fetch the running project's root page and return a structural \
         description of the HTML (title, headings, links, forms, scripts). \
         The project must be running under the supervisor."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(runtime) = &ctx.runtime else {
            return ToolOutput::err(&call.id, "no project runtime available");
        };
        let Some(status) = runtime.project_status(&ctx.working_dir).await else {
            return ToolOutput::err(
                &call.id,
                "The project is not running. It starts automatically after a \
                 successful build turn.",
            );
        };
        if status.status != "running" {
            return ToolOutput::err(
                &call.id,
                format!("project is '{}', not running", status.status),
            );
        }
        let Some(port) = status.port else {
            return ToolOutput::err(&call.id, "project has no detected port yet");
        };

        let url = format!("http://127.0.0.1:{port}/");
        let html = match fetch_page(&url).await {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot fetch {url}: {e}")),
        };

        ToolOutput::ok(&call.id, describe_html(&url, &html))
    }
}

async fn fetch_page(url: &str) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    let resp = client.get(url).send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        anyhow::bail!("HTTP {status}");
    }
    Ok(body)
}

/// Structural description of an HTML document.
fn describe_html(url: &str, html: &str) -> String {
    let mut out = format!("Page at {url}\n");

    if let Some(title) = extract_first(html, r"(?is)<title[^>]*>(.*?)</title>") {
        out.push_str(&format!("Title: {title}\n"));
    }

    let headings = extract_all(html, r"(?is)<h([1-3])[^>]*>(.*?)</h[1-3]>", 2);
    if !headings.is_empty() {
        out.push_str("Headings:\n");
        for h in headings.iter().take(10) {
            out.push_str(&format!("  {h}\n"));
        }
    }

    let links = extract_all(html, r#"(?is)<a[^>]*href="([^"]*)"[^>]*>"#, 1);
    if !links.is_empty() {
        out.push_str(&format!("Links ({}): {}\n", links.len(), preview(&links, 8)));
    }

    let forms = Regex::new(r"(?i)<form\b")
        .expect("form pattern")
        .find_iter(html)
        .count();
    if forms > 0 {
        out.push_str(&format!("Forms: {forms}\n"));
    }

    let scripts = extract_all(html, r#"(?is)<script[^>]*src="([^"]*)""#, 1);
    if !scripts.is_empty() {
        out.push_str(&format!("Scripts: {}\n", preview(&scripts, 5)));
    }

    let text = visible_text(html);
    if !text.is_empty() {
        let cap: String = text.chars().take(600).collect();
        out.push_str(&format!("Visible text (first 600 chars):\n{cap}\n"));
    }

    out
}

fn extract_first(html: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(html)
        .map(|c| strip_tags(&c[1]))
}

fn extract_all(html: &str, pattern: &str, group: usize) -> Vec<String> {
    let Ok(re) = Regex::new(pattern) else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|c| c.get(group).map(|m| strip_tags(m.as_str())))
        .filter(|s| !s.is_empty())
        .collect()
}

fn preview(items: &[String], n: usize) -> String {
    let shown: Vec<&str> = items.iter().take(n).map(String::as_str).collect();
    if items.len() > n {
        format!("{}, …", shown.join(", "))
    } else {
        shown.join(", ")
    }
}

fn strip_tags(fragment: &str) -> String {
    let re = Regex::new(r"<[^>]+>").expect("tag pattern");
    re.replace_all(fragment, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn visible_text(html: &str) -> String {
    // html2text renders the document the way a text browser would, which is
    // exactly the "what does the page say" signal the model needs.
    html2text::from_read(html.as_bytes(), 100)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
      <html><head><title>My App</title></head>
      <body>
        <h1>Welcome</h1>
        <h2>Features</h2>
        <a href="/about">About</a>
        <a href="/contact">Contact</a>
        <form action="/login"><input name="u"></form>
        <script src="/main.js"></script>
        <p>Hello visitor</p>
      </body></html>"#;

    #[test]
    fn describes_title_headings_links() {
        let desc = describe_html("http://127.0.0.1:3100/", PAGE);
        assert!(desc.contains("Title: My App"));
        assert!(desc.contains("Welcome"));
        assert!(desc.contains("Features"));
        assert!(desc.contains("Links (2)"));
        assert!(desc.contains("Forms: 1"));
        assert!(desc.contains("/main.js"));
    }

    #[test]
    fn visible_text_is_included() {
        let desc = describe_html("http://x/", PAGE);
        assert!(desc.contains("Hello visitor"));
    }

    #[tokio::test]
    async fn without_runtime_is_error() {
        let ctx = ToolContext::new("/tmp");
        let call = ToolCall {
            id: "1".into(),
            name: "take_screenshot".into(),
            args: json!({}),
        };
        let out = TakeScreenshotTool.execute(&call, &ctx).await;
        assert!(!out.success);
    }
}
