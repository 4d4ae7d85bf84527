//! Routing from a resolved operation to the adapter that owns it.
//!
//! Operations are a closed enum, so routing is an exhaustive match rather
//! than a string lookup with an "unsupported" fallback. Unknown names are
//! rejected earlier, by [`autoflow_adapters::Operation::lookup`].

use std::sync::Arc;

use autoflow_adapters::{
    ChatAdapter, CredentialProvider, ExecutionContext, Integration, MailAdapter, NotesAdapter,
    Operation, ServiceAdapter, TextGenerationAdapter,
};
use serde_json::Value;

/// One adapter per integration.
#[derive(Clone)]
pub struct AdapterSet {
    mail: Arc<dyn ServiceAdapter>,
    notes: Arc<dyn ServiceAdapter>,
    chat: Arc<dyn ServiceAdapter>,
    text_generation: Arc<dyn ServiceAdapter>,
}

impl AdapterSet {
    pub fn new(
        mail: Arc<dyn ServiceAdapter>,
        notes: Arc<dyn ServiceAdapter>,
        chat: Arc<dyn ServiceAdapter>,
        text_generation: Arc<dyn ServiceAdapter>,
    ) -> Self {
        Self {
            mail,
            notes,
            chat,
            text_generation,
        }
    }

    /// The HTTP adapters with their default endpoints.
    pub fn with_credentials(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::new(
            Arc::new(MailAdapter::new("mail", Arc::clone(&credentials))),
            Arc::new(NotesAdapter::new("notes", Arc::clone(&credentials))),
            Arc::new(ChatAdapter::new("chat", Arc::clone(&credentials))),
            Arc::new(TextGenerationAdapter::new("text_generation", credentials)),
        )
    }

    pub fn for_integration(&self, integration: Integration) -> &Arc<dyn ServiceAdapter> {
        match integration {
            Integration::Mail => &self.mail,
            Integration::Notes => &self.notes,
            Integration::Chat => &self.chat,
            Integration::TextGeneration => &self.text_generation,
        }
    }

    /// Run `operation` on the adapter of its integration.
    pub async fn dispatch(
        &self,
        operation: Operation,
        config: &Value,
        ctx: &mut ExecutionContext,
    ) -> autoflow_adapters::Result<Value> {
        self.for_integration(operation.integration())
            .execute(operation, config, ctx)
            .await
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("mail", &self.mail.id())
            .field("notes", &self.notes.id())
            .field("chat", &self.chat.id())
            .field("text_generation", &self.text_generation.id())
            .finish()
    }
}
