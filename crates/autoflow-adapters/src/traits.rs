//! Core adapter trait.
//!
//! Every integration implements [`ServiceAdapter`]. The orchestrator holds
//! adapters as `Arc<dyn ServiceAdapter>` and calls them with a fully
//! resolved configuration.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{AdapterError, Result};
use crate::operation::{Integration, Operation};

#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    fn integration(&self) -> Integration;

    /// Execute one operation and return its normalized payload.
    ///
    /// Required configuration keys are checked before any network call.
    /// Adapters may write into `ctx.variables`.
    async fn execute(
        &self,
        operation: Operation,
        config: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value>;

    /// Reject operations that belong to another integration.
    fn ensure_supported(&self, operation: Operation) -> Result<()> {
        if operation.integration() == self.integration() {
            Ok(())
        } else {
            Err(AdapterError::UnsupportedOperation {
                integration: self.integration().as_str(),
                operation: operation.to_string(),
            })
        }
    }
}
