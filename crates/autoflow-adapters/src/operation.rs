//! The closed set of integrations and operations.
//!
//! Workflow definitions name steps by free-form strings (`"gmail"`,
//! `"send_email"`, `"ai"`, ...). Those strings are mapped once through
//! [`Operation::lookup`]; everything after that matches on the enums, so
//! adding an operation forces every dispatch site to handle it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An external service family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    Mail,
    Notes,
    Chat,
    TextGeneration,
}

impl Integration {
    pub const ALL: [Integration; 4] = [
        Integration::Mail,
        Integration::Notes,
        Integration::Chat,
        Integration::TextGeneration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Notes => "notes",
            Self::Chat => "chat",
            Self::TextGeneration => "text_generation",
        }
    }

    /// Accepts both the generic names and the service names used by
    /// stored workflows.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        INTEGRATION_NAMES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map(|(_, integration)| *integration)
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete (integration, operation) pair an adapter can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SendEmail,
    ReplyToEmail,
    FetchEmails,
    CreatePage,
    QueryDatabase,
    SendMessage,
    ProcessText,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::SendEmail,
        Operation::ReplyToEmail,
        Operation::FetchEmails,
        Operation::CreatePage,
        Operation::QueryDatabase,
        Operation::SendMessage,
        Operation::ProcessText,
    ];

    pub fn integration(self) -> Integration {
        match self {
            Self::SendEmail | Self::ReplyToEmail | Self::FetchEmails => Integration::Mail,
            Self::CreatePage | Self::QueryDatabase => Integration::Notes,
            Self::SendMessage => Integration::Chat,
            Self::ProcessText => Integration::TextGeneration,
        }
    }

    /// Canonical operation name.
    pub fn name(self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::ReplyToEmail => "reply_to_email",
            Self::FetchEmails => "fetch_emails",
            Self::CreatePage => "create_page",
            Self::QueryDatabase => "query_database",
            Self::SendMessage => "send_message",
            Self::ProcessText => "process_text",
        }
    }

    /// Configuration fields that must be present and non-empty.
    ///
    /// Each entry lists the accepted keys for one field, canonical key first.
    pub fn required_fields(self) -> &'static [&'static [&'static str]] {
        match self {
            Self::SendEmail => &[&["to", "to_email"], &["subject"], &["body"]],
            Self::ReplyToEmail => &[&["body"]],
            Self::FetchEmails => &[],
            Self::CreatePage => &[&["database_id"], &["title"]],
            Self::QueryDatabase => &[&["database_id"]],
            Self::SendMessage => &[&["chat_id"], &["message"]],
            Self::ProcessText => &[&["prompt"]],
        }
    }

    /// Resolve an (integration, operation) name pair.
    pub fn lookup(integration: &str, operation: &str) -> Option<Self> {
        let integration = Integration::from_name(integration)?;
        let operation = operation.trim();
        OPERATION_NAMES
            .iter()
            .find(|(owner, alias, _)| {
                *owner == integration && alias.eq_ignore_ascii_case(operation)
            })
            .map(|(_, _, op)| *op)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.integration(), self.name())
    }
}

static INTEGRATION_NAMES: &[(&str, Integration)] = &[
    ("gmail", Integration::Mail),
    ("mail", Integration::Mail),
    ("email", Integration::Mail),
    ("notion", Integration::Notes),
    ("notes", Integration::Notes),
    ("telegram", Integration::Chat),
    ("chat", Integration::Chat),
    ("ai", Integration::TextGeneration),
    ("text_generation", Integration::TextGeneration),
    ("llm", Integration::TextGeneration),
];

static OPERATION_NAMES: &[(Integration, &str, Operation)] = &[
    (Integration::Mail, "send_email", Operation::SendEmail),
    (Integration::Mail, "send", Operation::SendEmail),
    (Integration::Mail, "reply_to_email", Operation::ReplyToEmail),
    (Integration::Mail, "reply", Operation::ReplyToEmail),
    (Integration::Mail, "fetch_emails", Operation::FetchEmails),
    (Integration::Mail, "fetch", Operation::FetchEmails),
    (Integration::Notes, "create_page", Operation::CreatePage),
    (Integration::Notes, "query_database", Operation::QueryDatabase),
    (Integration::Chat, "send_message", Operation::SendMessage),
    (Integration::Chat, "send", Operation::SendMessage),
    (Integration::TextGeneration, "process_text", Operation::ProcessText),
    (Integration::TextGeneration, "process", Operation::ProcessText),
    (Integration::TextGeneration, "generate", Operation::ProcessText),
];
