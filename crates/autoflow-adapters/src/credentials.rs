//! Credential lookup.
//!
//! Token acquisition and refresh happen outside autoflow. Adapters only ask
//! a [`CredentialProvider`] for the current bearer token of a user and
//! integration; a missing or expired token becomes an ordinary credential
//! step failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::operation::Integration;

/// A bearer token with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// Tokens never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of per-user integration credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` when the user has not connected the integration.
    async fn credential(&self, user_id: &str, integration: Integration)
    -> Result<Option<Credential>>;
}

/// Fetch a usable token or fail with [`AdapterError::Credential`].
pub async fn bearer_token(
    provider: &dyn CredentialProvider,
    user_id: &str,
    integration: Integration,
    service: &'static str,
) -> Result<String> {
    let credential = provider
        .credential(user_id, integration)
        .await?
        .ok_or_else(|| AdapterError::Credential {
            service,
            reason: format!("no {integration} credential configured for user `{user_id}`"),
        })?;

    if credential.is_expired_at(Utc::now()) {
        let expired = credential
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default();
        return Err(AdapterError::Credential {
            service,
            reason: format!("credential expired at {expired}"),
        });
    }
    if credential.token.trim().is_empty() {
        return Err(AdapterError::Credential {
            service,
            reason: "credential token is empty".into(),
        });
    }

    Ok(credential.token)
}

// ---------------------------------------------------------------------------
// StaticCredentials
// ---------------------------------------------------------------------------

/// In-memory credentials, keyed by user and integration.
///
/// Entries stored with [`StaticCredentials::insert_default`] apply to every
/// user that has no entry of its own. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    per_user: Arc<DashMap<(String, Integration), Credential>>,
    defaults: Arc<DashMap<Integration, Credential>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<String>, integration: Integration, credential: Credential) {
        self.per_user.insert((user_id.into(), integration), credential);
    }

    pub fn insert_default(&self, integration: Integration, credential: Credential) {
        self.defaults.insert(integration, credential);
    }

    pub fn remove(&self, user_id: &str, integration: Integration) -> Option<Credential> {
        self.per_user
            .remove(&(user_id.to_string(), integration))
            .map(|(_, c)| c)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(
        &self,
        user_id: &str,
        integration: Integration,
    ) -> Result<Option<Credential>> {
        if let Some(entry) = self.per_user.get(&(user_id.to_string(), integration)) {
            return Ok(Some(entry.value().clone()));
        }
        Ok(self.defaults.get(&integration).map(|e| e.value().clone()))
    }
}

// ---------------------------------------------------------------------------
// EnvCredentials
// ---------------------------------------------------------------------------

/// Variable names consulted for each integration, first match wins.
pub const ENV_VARS: &[(Integration, &[&str])] = &[
    (Integration::Mail, &["AUTOFLOW_GMAIL_TOKEN"]),
    (Integration::Notes, &["AUTOFLOW_NOTION_TOKEN"]),
    (Integration::Chat, &["AUTOFLOW_TELEGRAM_TOKEN"]),
    (
        Integration::TextGeneration,
        &["AUTOFLOW_AI_API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"],
    ),
];

/// Process-wide credentials taken from environment variables.
///
/// The same token is used for every user; this is what the CLI runs with.
#[derive(Clone, Default)]
pub struct EnvCredentials {
    tokens: HashMap<Integration, Credential>,
}

impl EnvCredentials {
    /// Snapshot the current process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary lookup, e.g. a parsed `.env` map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut tokens = HashMap::new();
        for (integration, names) in ENV_VARS {
            let found = names.iter().find_map(|name| {
                lookup(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (*name, v))
            });
            if let Some((name, token)) = found {
                debug!(integration = %integration, var = name, "credential loaded from environment");
                tokens.insert(*integration, Credential::new(token));
            }
        }
        Self { tokens }
    }

    pub fn has(&self, integration: Integration) -> bool {
        self.tokens.contains_key(&integration)
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credential(
        &self,
        _user_id: &str,
        integration: Integration,
    ) -> Result<Option<Credential>> {
        Ok(self.tokens.get(&integration).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn missing_credential_is_credential_error() {
        let creds = StaticCredentials::new();
        let err = bearer_token(&creds, "u1", Integration::Mail, "gmail")
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Credential { service: "gmail", .. }));
    }

    #[tokio::test]
    async fn expired_credential_is_rejected() {
        let creds = StaticCredentials::new();
        creds.insert(
            "u1",
            Integration::Notes,
            Credential::expiring_at("tok", Utc::now() - Duration::minutes(5)),
        );
        let err = bearer_token(&creds, "u1", Integration::Notes, "notion")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn user_entry_overrides_default() {
        let creds = StaticCredentials::new();
        creds.insert_default(Integration::Chat, Credential::new("shared"));
        creds.insert("vip", Integration::Chat, Credential::new("own"));

        let own = bearer_token(&creds, "vip", Integration::Chat, "telegram")
            .await
            .unwrap();
        let shared = bearer_token(&creds, "other", Integration::Chat, "telegram")
            .await
            .unwrap();
        assert_eq!(own, "own");
        assert_eq!(shared, "shared");
    }

    #[tokio::test]
    async fn env_lookup_uses_fallback_names() {
        let creds = EnvCredentials::from_lookup(|name| match name {
            "GEMINI_API_KEY" => Some("gem".into()),
            "AUTOFLOW_AI_API_KEY" => Some("  ".into()),
            "AUTOFLOW_GMAIL_TOKEN" => Some("mail-token".into()),
            _ => None,
        });
        assert!(creds.has(Integration::TextGeneration));
        assert!(!creds.has(Integration::Notes));

        let ai = creds
            .credential("anyone", Integration::TextGeneration)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ai.token, "gem");
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", Credential::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }
}
