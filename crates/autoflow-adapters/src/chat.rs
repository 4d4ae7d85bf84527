//! Telegram Bot API adapter.
//!
//! Supports a single operation, `send_message`, which posts the configured
//! text verbatim to `{base}/bot{token}/sendMessage`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::credentials::{CredentialProvider, bearer_token};
use crate::error::{AdapterError, Result};
use crate::fields::{check_required, optional_bool, optional_text, required_text};
use crate::http;
use crate::operation::{Integration, Operation};
use crate::traits::ServiceAdapter;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SERVICE: &str = "telegram";

pub struct ChatAdapter {
    id: String,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
}

impl ChatAdapter {
    pub fn new(id: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            id: id.into(),
            base_url: TELEGRAM_API_BASE.to_string(),
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

    // -----------------------------------------------------------------------
    // Response parsing
    // -----------------------------------------------------------------------

    /// Telegram wraps every answer in `{"ok": bool, ...}`; `ok: false` is a
    /// failure even with HTTP 200.
    pub fn parse_telegram_response(response: &Value) -> Result<&Value> {
        let ok = response
            .get("ok")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if !ok {
            let error_code = response.get("error_code").and_then(|v| v.as_u64());
            let description = response
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(AdapterError::ExternalService {
                service: SERVICE,
                status: error_code.and_then(|c| u16::try_from(c).ok()),
                reason: description.to_string(),
            });
        }

        Ok(response.get("result").unwrap_or(&Value::Null))
    }

    async fn send_message(&self, config: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let op = Operation::SendMessage;
        let chat_id = required_text(config, op, &["chat_id"])?;
        let text = required_text(config, op, &["message"])?;

        let token =
            bearer_token(self.credentials.as_ref(), &ctx.user_id, Integration::Chat, SERVICE)
                .await?;

        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(mode) = optional_text(config, &["parse_mode"]) {
            body["parse_mode"] = json!(mode);
        }
        for flag in ["disable_notification", "disable_web_page_preview"] {
            if let Some(value) = optional_bool(config, flag) {
                body[flag] = json!(value);
            }
        }

        debug!(chat_id = %chat_id, chars = text.chars().count(), "sending Telegram message");

        let url = format!("{}/bot{}/sendMessage", self.base_url, token);
        let response = self.http.post(&url).json(&body).send().await?;
        let json_resp = http::json_body(SERVICE, response).await?;
        let result = Self::parse_telegram_response(&json_resp)?;

        let message_id = result.get("message_id").cloned().unwrap_or(Value::Null);
        info!(chat_id = %chat_id, message_id = %message_id, "Telegram message sent");

        Ok(json!({
            "message_id": message_id,
            "chat_id": chat_id,
            "text": text,
            "date": result.get("date").cloned().unwrap_or(Value::Null),
            "total_chats": 1,
            "successful_sends": 1,
        }))
    }
}

#[async_trait]
impl ServiceAdapter for ChatAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn integration(&self) -> Integration {
        Integration::Chat
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
            Operation::SendMessage => self.send_message(config, ctx).await,
            other => Err(AdapterError::UnsupportedOperation {
                integration: Integration::Chat.as_str(),
                operation: other.to_string(),
            }),
        }
    }
}
