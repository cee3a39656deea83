// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::sandbox::resolve_path;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Default database file inside the project.
const DEFAULT_DB: &str = "database.sqlite";
/// Row cap for SELECT output.
const MAX_ROWS: usize = 100;

/// SQLite CRUD against the project's embedded database.
///
/// A statement whose leading keyword is `SELECT` (or `PRAGMA`/`EXPLAIN`) is
/// executed as a query and its rows rendered; anything else runs as a
/// mutation and reports the affected row count.
pub struct ManageDatabaseTool;

#[async_trait]
impl Tool for ManageDatabaseTool {
    fn name(&self) -> &str {
        "manage_database"
    }

    fn description(&self) -> &str {
        "Execute SQL against the project's SQLite database (database.sqlite \
         by default, created on first use). SELECT statements return up to \
         100 rows; other statements report the number of affected rows."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "The SQL statement to execute"
                },
                "database": {
                    "type": "string",
                    "description": "Database file relative to the project root (default database.sqlite)"
                }
            },
            "required": ["sql"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(sql) = call.args.get("sql").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'sql'");
        };
        let db = call
            .args
            .get("database")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_DB);
        let resolved = match resolve_path(&ctx.working_dir, db, ctx.sandboxed) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let sql = sql.trim().to_string();
        // rusqlite is synchronous; keep it off the async executor.
        let result = tokio::task::spawn_blocking(move || run_sql(&resolved, &sql)).await;
        match result {
            Ok(Ok(text)) => ToolOutput::ok(&call.id, text),
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("SQL error: {e}")),
            Err(e) => ToolOutput::err(&call.id, format!("Tool error: {e}")),
        }
    }
}

fn is_query(sql: &str) -> bool {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(keyword.as_str(), "SELECT" | "PRAGMA" | "EXPLAIN" | "WITH")
}

fn run_sql(path: &std::path::Path, sql: &str) -> anyhow::Result<String> {
    let conn = Connection::open(path)?;

    if is_query(sql) {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut lines = vec![columns.join(" | ")];
        let mut count = 0usize;
        while let Some(row) = rows.next()? {
            if count >= MAX_ROWS {
                lines.push(format!("... (stopped at {MAX_ROWS} rows)"));
                break;
            }
            let rendered: Vec<String> = (0..columns.len())
                .map(|i| match row.get_ref(i) {
                    Ok(rusqlite::types::ValueRef::Null) => "NULL".to_string(),
                    Ok(rusqlite::types::ValueRef::Integer(n)) => n.to_string(),
                    Ok(rusqlite::types::ValueRef::Real(f)) => f.to_string(),
                    Ok(rusqlite::types::ValueRef::Text(t)) => {
                        String::from_utf8_lossy(t).to_string()
                    }
                    Ok(rusqlite::types::ValueRef::Blob(b)) => format!("<{} bytes>", b.len()),
                    Err(_) => "?".to_string(),
                })
                .collect();
            lines.push(rendered.join(" | "));
            count += 1;
        }
        if count == 0 {
            lines.push("(no rows)".to_string());
        }
        Ok(lines.join("\n"))
    } else {
        let affected = conn.execute(sql, [])?;
        Ok(format!("OK, {affected} row(s) affected"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "manage_database".into(),
            args,
        }
    }

    #[tokio::test]
    async fn create_insert_select_cycle() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let t = ManageDatabaseTool;

        let out = t
            .execute(
                &call(json!({"sql": "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"})),
                &ctx,
            )
            .await;
        assert!(out.success, "{}", out.result);

        let out = t
            .execute(&call(json!({"sql": "INSERT INTO users (name) VALUES ('ada')"})), &ctx)
            .await;
        assert!(out.success);
        assert!(out.result.contains("1 row(s) affected"));

        let out = t
            .execute(&call(json!({"sql": "SELECT id, name FROM users"})), &ctx)
            .await;
        assert!(out.success);
        assert!(out.result.contains("id | name"));
        assert!(out.result.contains("1 | ada"));
    }

    #[tokio::test]
    async fn select_with_no_rows_reports_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let t = ManageDatabaseTool;
        t.execute(&call(json!({"sql": "CREATE TABLE t (x)"})), &ctx).await;
        let out = t.execute(&call(json!({"sql": "SELECT * FROM t"})), &ctx).await;
        assert!(out.success);
        assert!(out.result.contains("(no rows)"));
    }

    #[tokio::test]
    async fn syntax_error_is_tool_error() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ManageDatabaseTool
            .execute(&call(json!({"sql": "SELEKT broken"})), &ctx)
            .await;
        assert!(!out.success);
        assert!(out.result.contains("SQL error"));
    }

    #[tokio::test]
    async fn database_outside_project_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path());
        let out = ManageDatabaseTool
            .execute(
                &call(json!({"sql": "SELECT 1", "database": "../elsewhere.sqlite"})),
                &ctx,
            )
            .await;
        assert!(!out.success);
        assert!(out.result.contains("outside"));
    }

    #[test]
    fn query_detection_by_leading_keyword() {
        assert!(is_query("SELECT * FROM x"));
        assert!(is_query("  select 1"));
        assert!(is_query("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert!(!is_query("INSERT INTO x VALUES (1)"));
        assert!(!is_query("UPDATE x SET y = 2"));
        assert!(!is_query("DROP TABLE x"));
    }
}
