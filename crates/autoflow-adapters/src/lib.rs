//! Service adapters for autoflow: mail, notes, chat and text generation.
//!
//! Each adapter implements [`ServiceAdapter`]: it receives one resolved
//! step configuration, performs a single external call (text generation
//! retries a bounded number of times) and returns a normalized JSON
//! payload. The closed set of supported operations lives in [`operation`].

pub mod chat;
pub mod context;
pub mod credentials;
pub mod error;
pub mod fields;
pub mod http;
pub mod mail;
pub mod notes;
pub mod operation;
pub mod text_generation;
pub mod traits;

pub use chat::ChatAdapter;
pub use context::{ExecutionContext, MessageRef, Variables};
pub use credentials::{Credential, CredentialProvider, EnvCredentials, StaticCredentials};
pub use error::{AdapterError, Result, StepErrorKind};
pub use mail::MailAdapter;
pub use notes::NotesAdapter;
pub use operation::{Integration, Operation};
pub use text_generation::{RetryPolicy, TextGenerationAdapter};
pub use traits::ServiceAdapter;
