//! Notion API adapter.
//!
//! - `create_page` - add a page to a database, with the step's `content`
//!   converted to blocks
//! - `query_database` - run a database query and flatten the result pages

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::credentials::{CredentialProvider, bearer_token};
use crate::error::{AdapterError, Result};
use crate::fields::{check_required, optional_text, optional_u64, required_text};
use crate::http;
use crate::operation::{Integration, Operation};
use crate::traits::ServiceAdapter;

const NOTION_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const SERVICE: &str = "notion";

/// Notion rejects rich-text items longer than this.
const RICH_TEXT_LIMIT: usize = 2000;
/// Maximum children accepted in one create request.
const MAX_BLOCKS: usize = 100;
const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 100;

pub struct NotesAdapter {
    id: String,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
}

impl NotesAdapter {
    pub fn new(id: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            id: id.into(),
            base_url: NOTION_API_BASE.to_string(),
            credentials,
            http: http::client(http::DEFAULT_TIMEOUT),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = http::client(timeout);
        self
    }

    async fn post(&self, ctx: &ExecutionContext, path: &str, body: &Value) -> Result<Value> {
        let token =
            bearer_token(self.credentials.as_ref(), &ctx.user_id, Integration::Notes, SERVICE)
                .await?;
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "calling Notion");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await?;
        http::json_body(SERVICE, response).await
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    async fn create_page(&self, config: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let op = Operation::CreatePage;
        let database_id = required_text(config, op, &["database_id"])?;
        let title = required_text(config, op, &["title"])?;
        let title_property =
            optional_text(config, &["title_property"]).unwrap_or_else(|| "title".to_string());

        let properties = page_properties(&title_property, &title, config.get("properties"))
            .map_err(|reason| AdapterError::InvalidConfig {
                operation: op.name(),
                reason,
            })?;

        let mut body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });

        let content = optional_text(config, &["content"]).unwrap_or_default();
        let mut blocks = content_blocks(&content);
        if blocks.len() > MAX_BLOCKS {
            warn!(blocks = blocks.len(), "content truncated to {MAX_BLOCKS} blocks");
            blocks.truncate(MAX_BLOCKS);
        }
        if !blocks.is_empty() {
            body["children"] = Value::Array(blocks);
        }

        let page = self.post(ctx, "pages", &body).await?;
        let page_id = page.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        info!(page_id = %page_id, database_id = %database_id, "Notion page created");

        Ok(json!({
            "page_id": page_id,
            "url": page.get("url").cloned().unwrap_or(Value::Null),
            "title": title,
            "content": content,
            "created_time": page.get("created_time").cloned().unwrap_or(Value::Null),
            "database_id": database_id,
        }))
    }

    async fn query_database(&self, config: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let op = Operation::QueryDatabase;
        let database_id = required_text(config, op, &["database_id"])?;
        let page_size = optional_u64(config, "page_size")
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut body = json!({ "page_size": page_size });
        for key in ["filter", "sorts", "start_cursor"] {
            if let Some(value) = config.get(key).filter(|v| !is_blank(v)) {
                body[key] = value.clone();
            }
        }

        let response = self
            .post(ctx, &format!("databases/{database_id}/query"), &body)
            .await?;

        let results: Vec<Value> = response
            .get("results")
            .and_then(|v| v.as_array())
            .map(|pages| pages.iter().map(summarize_page).collect())
            .unwrap_or_default();

        info!(database_id = %database_id, count = results.len(), "Notion database queried");
        Ok(json!({
            "count": results.len(),
            "results": results,
            "has_more": response.get("has_more").cloned().unwrap_or(json!(false)),
            "next_cursor": response.get("next_cursor").cloned().unwrap_or(Value::Null),
            "database_id": database_id,
        }))
    }
}

#[async_trait]
impl ServiceAdapter for NotesAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn integration(&self) -> Integration {
        Integration::Notes
    }

    async fn execute(
        &self,
        operation: Operation,
        config: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        self.ensure_supported(operation)?;
        check_required(config, operation)?;
        match operation {
            Operation::CreatePage => self.create_page(config, ctx).await,
            Operation::QueryDatabase => self.query_database(config, ctx).await,
            other => Err(AdapterError::UnsupportedOperation {
                integration: Integration::Notes.as_str(),
                operation: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Title property plus any extra properties; extras never replace the
/// title. A string `properties` value is parsed as JSON.
fn page_properties(
    title_property: &str,
    title: &str,
    extra: Option<&Value>,
) -> std::result::Result<Map<String, Value>, String> {
    let mut properties = Map::new();
    properties.insert(
        title_property.to_string(),
        json!({ "title": rich_text(title) }),
    );

    let extra = match extra {
        None | Some(Value::Null) => return Ok(properties),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(properties),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map_err(|e| format!("`properties` is not valid JSON: {e}"))?,
        Some(other) => other.clone(),
    };
    let Value::Object(extra) = extra else {
        return Err("`properties` must be an object".to_string());
    };

    for (key, value) in extra {
        if key.eq_ignore_ascii_case(title_property) {
            continue;
        }
        properties.insert(key, value);
    }
    Ok(properties)
}

/// Split `text` into rich-text items of at most [`RICH_TEXT_LIMIT`] chars.
fn rich_text(text: &str) -> Vec<Value> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![json!({ "type": "text", "text": { "content": "" } })];
    }
    chars
        .chunks(RICH_TEXT_LIMIT)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": content } })
        })
        .collect()
}

/// Convert plain text into Notion blocks, one per blank-line separated
/// paragraph. `# `/`## `/`### ` give headings and `- `/`* ` bullets.
pub fn content_blocks(content: &str) -> Vec<Value> {
    content
        .replace("\r\n", "\n")
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|paragraph| {
            let (kind, text) = if let Some(rest) = paragraph.strip_prefix("### ") {
                ("heading_3", rest)
            } else if let Some(rest) = paragraph.strip_prefix("## ") {
                ("heading_2", rest)
            } else if let Some(rest) = paragraph.strip_prefix("# ") {
                ("heading_1", rest)
            } else if let Some(rest) = paragraph
                .strip_prefix("- ")
                .or_else(|| paragraph.strip_prefix("* "))
            {
                ("bulleted_list_item", rest)
            } else {
                ("paragraph", paragraph)
            };
            json!({
                "object": "block",
                "type": kind,
                kind: { "rich_text": rich_text(text) },
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn summarize_page(page: &Value) -> Value {
    json!({
        "id": page.get("id").cloned().unwrap_or(Value::Null),
        "url": page.get("url").cloned().unwrap_or(Value::Null),
        "title": page_title(page),
        "created_time": page.get("created_time").cloned().unwrap_or(Value::Null),
        "last_edited_time": page.get("last_edited_time").cloned().unwrap_or(Value::Null),
        "properties": page.get("properties").cloned().unwrap_or(json!({})),
        "archived": page.get("archived").cloned().unwrap_or(json!(false)),
    })
}

/// Text of whichever property has type `title`.
fn page_title(page: &Value) -> String {
    page.get("properties")
        .and_then(|p| p.as_object())
        .and_then(|props| props.values().find_map(|prop| prop.get("title")?.as_array()))
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    part.get("plain_text")
                        .or_else(|| part.pointer("/text/content"))
                        .and_then(|v| v.as_str())
                })
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_from_markdownish_text() {
        let blocks = content_blocks("# Title\n\nIntro line\n\n- item\n\n## Sub\n\n* star\n\n### Deep");
        let kinds: Vec<&str> = blocks.iter().map(|b| b["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                "heading_1",
                "paragraph",
                "bulleted_list_item",
                "heading_2",
                "bulleted_list_item",
                "heading_3"
            ]
        );
        assert_eq!(blocks[0]["heading_1"]["rich_text"][0]["text"]["content"], "Title");
        assert_eq!(blocks[2]["bulleted_list_item"]["rich_text"][0]["text"]["content"], "item");
    }

    #[test]
    fn empty_content_has_no_blocks() {
        assert!(content_blocks("").is_empty());
        assert!(content_blocks("\n\n   \n\n").is_empty());
    }

    #[test]
    fn long_paragraph_is_chunked() {
        let text = "x".repeat(RICH_TEXT_LIMIT * 2 + 5);
        let blocks = content_blocks(&text);
        let parts = blocks[0]["paragraph"]["rich_text"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2]["text"]["content"].as_str().unwrap().len(), 5);
    }

    #[test]
    fn extra_properties_never_replace_title() {
        let props = page_properties(
            "Name",
            "Weekly summary",
            Some(&json!({"name": {"rich_text": []}, "Status": {"select": {"name": "New"}}})),
        )
        .unwrap();
        assert_eq!(props["Name"]["title"][0]["text"]["content"], "Weekly summary");
        assert!(props.contains_key("Status"));
        assert!(!props.contains_key("name"));
    }

    #[test]
    fn string_properties_are_parsed() {
        let props = page_properties("title", "t", Some(&json!(r#"{"Tag": {"select": {"name": "x"}}}"#)))
            .unwrap();
        assert!(props.contains_key("Tag"));
        assert!(page_properties("title", "t", Some(&json!("not json"))).is_err());
        assert!(page_properties("title", "t", Some(&json!([1, 2]))).is_err());
    }

    #[test]
    fn page_title_from_any_title_property() {
        let page = json!({"properties": {
            "Tags": {"multi_select": []},
            "Task": {"title": [{"plain_text": "Buy "}, {"plain_text": "milk"}]}
        }});
        assert_eq!(page_title(&page), "Buy milk");
        assert_eq!(page_title(&json!({})), "Untitled");
    }
}
