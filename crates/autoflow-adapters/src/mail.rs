//! Gmail REST adapter.
//!
//! Supports three operations:
//!
//! - `send_email` - compose an RFC 2822 message and post it to `messages/send`
//! - `reply_to_email` - answer the triggering (or configured) message in its thread
//! - `fetch_emails` - list messages matching a search query and parse them

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::context::{ExecutionContext, extract_address};
use crate::credentials::{CredentialProvider, bearer_token};
use crate::error::{AdapterError, Result};
use crate::fields::{check_required, optional_bool, optional_text, optional_u64, required_text};
use crate::http;
use crate::operation::{Integration, Operation};
use crate::traits::ServiceAdapter;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const SERVICE: &str = "gmail";
const DEFAULT_QUERY: &str = "is:unread";
const DEFAULT_MAX_RESULTS: u64 = 10;
const MAX_RESULTS_CAP: u64 = 100;

fn html_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static pattern"))
}

pub struct MailAdapter {
    id: String,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
}

/// The pieces of an outgoing message.
#[derive(Debug, Default)]
struct Outgoing<'a> {
    to: &'a str,
    cc: Option<&'a str>,
    bcc: Option<&'a str>,
    subject: &'a str,
    body: &'a str,
    html: bool,
    in_reply_to: Option<&'a str>,
}

impl MailAdapter {
    pub fn new(id: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            id: id.into(),
            base_url: GMAIL_API_BASE.to_string(),
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

    async fn token(&self, ctx: &ExecutionContext) -> Result<String> {
        bearer_token(self.credentials.as_ref(), &ctx.user_id, Integration::Mail, SERVICE).await
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    async fn send_email(&self, config: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let op = Operation::SendEmail;
        let to = required_text(config, op, &["to", "to_email"])?;
        let subject = required_text(config, op, &["subject"])?;
        let body = required_text(config, op, &["body"])?;
        let cc = optional_text(config, &["cc", "cc_email"]);
        let bcc = optional_text(config, &["bcc", "bcc_email"]);

        let raw = build_raw_message(
            op,
            &Outgoing {
                to: &to,
                cc: cc.as_deref(),
                bcc: bcc.as_deref(),
                subject: &subject,
                body: &body,
                html: optional_bool(config, "is_html").unwrap_or(false),
                in_reply_to: None,
            },
        )?;

        let token = self.token(ctx).await?;
        let sent = self.post_message(&token, raw, None).await?;
        info!(to = %to, message_id = %sent.0, "email sent");

        Ok(json!({
            "message_id": sent.0,
            "thread_id": sent.1,
            "to": to,
            "subject": subject,
        }))
    }

    async fn reply_to_email(&self, config: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let op = Operation::ReplyToEmail;
        let body = required_text(config, op, &["body"])?;
        let original = ctx.trigger_message.as_ref();

        let message_id = optional_text(config, &["message_id"])
            .or_else(|| original.map(|m| m.message_id.clone()))
            .ok_or(AdapterError::MissingField {
                operation: op.name(),
                field: "message_id",
            })?;
        let mut thread_id = optional_text(config, &["thread_id"])
            .or_else(|| original.and_then(|m| m.thread_id.clone()));
        let mut to = optional_text(config, &["to", "custom_to_email"])
            .or_else(|| original.and_then(|m| m.sender.clone()));
        let mut subject = optional_text(config, &["subject"])
            .or_else(|| original.and_then(|m| m.subject.clone()));

        let token = self.token(ctx).await?;

        if to.is_none() || subject.is_none() || thread_id.is_none() {
            let fetched = self.get_message(&token, &message_id, "metadata").await?;
            let headers = header_lookup(&fetched);
            to = to.or_else(|| headers("From").map(|f| extract_address(&f)));
            subject = subject.or_else(|| headers("Subject"));
            thread_id = thread_id.or_else(|| text_field(&fetched, "threadId"));
        }

        let to = to.ok_or(AdapterError::InvalidConfig {
            operation: op.name(),
            reason: "cannot determine reply recipient".into(),
        })?;
        let subject = reply_subject(subject.as_deref().unwrap_or_default());

        let raw = build_raw_message(
            op,
            &Outgoing {
                to: &to,
                subject: &subject,
                body: &body,
                html: optional_bool(config, "is_html").unwrap_or(false),
                in_reply_to: Some(&message_id),
                ..Outgoing::default()
            },
        )?;

        let sent = self.post_message(&token, raw, thread_id.as_deref()).await?;
        info!(to = %to, in_reply_to = %message_id, "reply sent");

        Ok(json!({
            "message_id": sent.0,
            "thread_id": sent.1,
            "to": to,
            "subject": subject,
            "in_reply_to": message_id,
            "is_reply": true,
        }))
    }

    async fn fetch_emails(&self, config: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let query = build_query(config);
        let max_results = optional_u64(config, "max_results")
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_CAP);

        let token = self.token(ctx).await?;

        debug!(query = %query, max_results, "listing Gmail messages");
        let max_results = max_results.to_string();
        let response = self
            .http
            .get(format!("{}/messages", self.base_url))
            .bearer_auth(&token)
            .query(&[("q", query.as_str()), ("maxResults", max_results.as_str())])
            .send()
            .await?;
        let listing = http::json_body(SERVICE, response).await?;

        let ids: Vec<String> = listing
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|m| text_field(m, "id")).collect())
            .unwrap_or_default();

        let mut emails = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.get_message(&token, id, "full").await {
                Ok(message) => emails.push(parse_message(&message)),
                Err(e @ AdapterError::Credential { .. }) => return Err(e),
                Err(e) => warn!(message_id = %id, error = %e, "skipping unreadable message"),
            }
        }

        info!(query = %query, count = emails.len(), "emails fetched");
        Ok(json!({
            "count": emails.len(),
            "emails": emails,
            "query": query,
        }))
    }

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    /// Post a raw message; returns `(message_id, thread_id)`.
    async fn post_message(
        &self,
        token: &str,
        raw: String,
        thread_id: Option<&str>,
    ) -> Result<(String, String)> {
        let mut body = json!({ "raw": raw });
        if let Some(thread) = thread_id {
            body["threadId"] = json!(thread);
        }

        let response = self
            .http
            .post(format!("{}/messages/send", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let sent = http::json_body(SERVICE, response).await?;

        let id = text_field(&sent, "id").ok_or_else(|| AdapterError::ExternalService {
            service: SERVICE,
            status: None,
            reason: "send response carries no message id".into(),
        })?;
        Ok((id, text_field(&sent, "threadId").unwrap_or_default()))
    }

    async fn get_message(&self, token: &str, id: &str, format: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/messages/{}", self.base_url, id))
            .bearer_auth(token)
            .query(&[("format", format)])
            .send()
            .await?;
        http::json_body(SERVICE, response).await
    }
}

#[async_trait]
impl ServiceAdapter for MailAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn integration(&self) -> Integration {
        Integration::Mail
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
            Operation::SendEmail => self.send_email(config, ctx).await,
            Operation::ReplyToEmail => self.reply_to_email(config, ctx).await,
            Operation::FetchEmails => self.fetch_emails(config, ctx).await,
            other => Err(AdapterError::UnsupportedOperation {
                integration: Integration::Mail.as_str(),
                operation: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Message composition
// ---------------------------------------------------------------------------

/// Base64url-encoded RFC 2822 message, as `messages/send` expects in `raw`.
///
/// Header values carrying a line break are rejected, so resolved template
/// text can never end the header block or add headers of its own.
fn build_raw_message(operation: Operation, msg: &Outgoing<'_>) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("To: {}\r\n", header_value(operation, "To", msg.to)?));
    if let Some(cc) = msg.cc {
        out.push_str(&format!("Cc: {}\r\n", header_value(operation, "Cc", cc)?));
    }
    if let Some(bcc) = msg.bcc {
        out.push_str(&format!("Bcc: {}\r\n", header_value(operation, "Bcc", bcc)?));
    }
    let subject = header_value(operation, "Subject", msg.subject)?;
    out.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
    if let Some(id) = msg.in_reply_to {
        let id = angle_bracketed(header_value(operation, "In-Reply-To", id)?);
        out.push_str(&format!("In-Reply-To: {id}\r\nReferences: {id}\r\n"));
    }
    let content_type = if msg.html { "text/html" } else { "text/plain" };
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!("Content-Type: {content_type}; charset=\"UTF-8\"\r\n"));
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");

    let encoded = STANDARD.encode(msg.body.as_bytes());
    for line in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str("\r\n");
    }

    Ok(URL_SAFE.encode(out.as_bytes()))
}

fn header_value<'a>(operation: Operation, header: &str, value: &'a str) -> Result<&'a str> {
    if value.contains(['\r', '\n']) {
        return Err(AdapterError::InvalidConfig {
            operation: operation.name(),
            reason: format!("{header} header value contains a line break"),
        });
    }
    Ok(value)
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn angle_bracketed(id: &str) -> String {
    let id = id.trim();
    if id.starts_with('<') && id.ends_with('>') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

/// Prefix `Re: ` unless the subject already carries it.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Gmail search query from the structured fields, else `query`, else
/// `is:unread`.
pub fn build_query(config: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(keywords) = optional_text(config, &["keywords"]) {
        parts.push(format!("({keywords})"));
    }
    if let Some(from) = optional_text(config, &["from_email"]) {
        parts.push(format!("from:{from}"));
    }
    if let Some(subject) = optional_text(config, &["subject_contains"]) {
        parts.push(format!("subject:({subject})"));
    }
    if parts.is_empty() {
        optional_text(config, &["query"]).unwrap_or_else(|| DEFAULT_QUERY.to_string())
    } else {
        parts.join(" ")
    }
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

fn text_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Case-insensitive header getter over a Gmail message resource.
fn header_lookup(message: &Value) -> impl Fn(&str) -> Option<String> + '_ {
    move |name: &str| {
        message
            .pointer("/payload/headers")?
            .as_array()?
            .iter()
            .find(|h| {
                h.get("name")
                    .and_then(|n| n.as_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|h| text_field(h, "value"))
    }
}

/// Flatten a Gmail message resource into the shape steps consume.
pub fn parse_message(message: &Value) -> Value {
    let headers = header_lookup(message);
    let from = headers("From").unwrap_or_default();
    let timestamp = text_field(message, "internalDate")
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339());

    let body = message
        .get("payload")
        .and_then(extract_body)
        .or_else(|| text_field(message, "snippet"))
        .unwrap_or_default();

    json!({
        "id": text_field(message, "id"),
        "thread_id": text_field(message, "threadId"),
        "subject": headers("Subject").unwrap_or_else(|| "No Subject".to_string()),
        "sender": extract_address(&from),
        "from": from,
        "date": headers("Date"),
        "body": body,
        "snippet": text_field(message, "snippet").unwrap_or_default(),
        "timestamp": timestamp,
    })
}

/// Prefer `text/plain` anywhere in the part tree, then stripped
/// `text/html`.
fn extract_body(payload: &Value) -> Option<String> {
    find_part(payload, "text/plain")
        .or_else(|| find_part(payload, "text/html").map(|html| strip_html(&html)))
}

fn find_part(part: &Value, mime: &str) -> Option<String> {
    let own_type = part.get("mimeType").and_then(|v| v.as_str());
    let own_data = part.pointer("/body/data").and_then(|v| v.as_str());
    if let Some(data) = own_data {
        if own_type.is_none_or(|t| t.eq_ignore_ascii_case(mime)) {
            if let Some(text) = decode_base64url(data) {
                return Some(text);
            }
        }
    }
    part.get("parts")?
        .as_array()?
        .iter()
        .find_map(|child| find_part(child, mime))
}

fn decode_base64url(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim().trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn strip_html(html: &str) -> String {
    html_tag_regex()
        .replace_all(html, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
