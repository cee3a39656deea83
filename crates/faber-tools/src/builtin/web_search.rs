// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Maximum snippets returned.
const MAX_RESULTS: usize = 8;

/// One-shot web search over the DuckDuckGo HTML endpoint.
///
/// The HTML is scraped, not parsed through an API — a layout change degrades
/// gracefully into "no results" rather than an error.
pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return up to 8 titled result snippets. Use for \
         library documentation, error messages, and anything newer than your \
         training data."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let Some(query) = call.args.get("query").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'query'");
        };
        debug!(query = %query, "web_search");

        let html = match fetch_results_page(query).await {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call.id, format!("search failed: {e}")),
        };

        let results = parse_results(&html);
        if results.is_empty() {
            return ToolOutput::ok(&call.id, "no results");
        }

        let rendered: Vec<String> = results
            .iter()
            .take(MAX_RESULTS)
            .enumerate()
            .map(|(i, r)| format!("{}. {}\n   {}\n   {}", i + 1, r.title, r.url, r.snippet))
            .collect();
        ToolOutput::ok(&call.id, rendered.join("\n\n"))
    }
}

struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

async fn fetch_results_page(query: &str) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("Mozilla/5.0 (compatible; faber-agent)")
        .build()?;
    let url = format!(
        "https://html.duckduckgo.com/html/?q={}",
        urlencoding::encode(query)
    );
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("search endpoint returned {}", resp.status());
    }
    Ok(resp.text().await?)
}

/// Pull `result__a` anchors and `result__snippet` bodies out of the result
/// page.  Anything that fails to match simply yields fewer results.
fn parse_results(html: &str) -> Vec<SearchResult> {
    let link_re =
        Regex::new(r#"(?s)<a[^>]*class="[^"]*result__a[^"]*"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("result link pattern");
    let snippet_re =
        Regex::new(r#"(?s)<a[^>]*class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</a>"#)
            .expect("result snippet pattern");

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| clean_html_fragment(&c[1]))
        .collect();

    link_re
        .captures_iter(html)
        .enumerate()
        .map(|(i, c)| SearchResult {
            url: decode_ddg_redirect(&c[1]),
            title: clean_html_fragment(&c[2]),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .filter(|r| !r.title.is_empty())
        .collect()
}

/// DuckDuckGo wraps result URLs in a redirect (`/l/?uddg=<encoded>`).
fn decode_ddg_redirect(href: &str) -> String {
    if let Some(pos) = href.find("uddg=") {
        let encoded = &href[pos + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    href.to_string()
}

/// Strip tags and collapse entities/whitespace in an HTML fragment.
fn clean_html_fragment(fragment: &str) -> String {
    let tag_re = Regex::new(r"<[^>]+>").expect("tag pattern");
    let text = tag_re.replace_all(fragment, "");
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
      <div class="result">
        <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fdocs&rut=x">Example <b>Docs</b></a>
        <a class="result__snippet" href="#">The <b>official</b> documentation &amp; guides.</a>
      </div>
      <div class="result">
        <a rel="nofollow" class="result__a" href="https://other.org/page">Other Page</a>
        <a class="result__snippet" href="#">Second snippet here.</a>
      </div>
    "##;

    #[test]
    fn parses_titles_urls_and_snippets() {
        let results = parse_results(SAMPLE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Example Docs");
        assert_eq!(results[0].url, "https://example.com/docs");
        assert_eq!(results[0].snippet, "The official documentation & guides.");
        assert_eq!(results[1].url, "https://other.org/page");
    }

    #[test]
    fn unparseable_page_yields_empty() {
        assert!(parse_results("<html><body>blocked</body></html>").is_empty());
    }

    #[test]
    fn redirect_decoding_handles_plain_urls() {
        assert_eq!(decode_ddg_redirect("https://a.b/c"), "https://a.b/c");
        assert_eq!(
            decode_ddg_redirect("//duckduckgo.com/l/?uddg=https%3A%2F%2Fx.y%2Fz&rut=1"),
            "https://x.y/z"
        );
    }

    #[test]
    fn html_fragments_are_cleaned() {
        assert_eq!(
            clean_html_fragment("  a <b>bold</b>\n claim &amp; more "),
            "a bold claim & more"
        );
    }
}
