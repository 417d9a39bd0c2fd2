//! Common types and utilities shared across RBA components.
//!
//! Everything the acquisition core and the agent run loop both need lives
//! here: the repository data model, the secret registry, the log sink
//! abstraction, credential-aware URL handling, the cooperative cancellation
//! token, and agent environment settings.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod errors;
pub mod logsink;
pub mod secrets;
pub mod settings;
pub mod types;
pub mod urlcred;

pub use cancel::CancelToken;
pub use errors::AcquireError;
pub use logsink::{BuildLog, RecordingLog, TracingLog, init_logging};
pub use secrets::SecretRegistry;
pub use settings::AgentSettings;
pub use types::{
    AgentCertificateBundle, Credential, ProxySettings, RepositoryDescriptor, RepositoryKind,
    SystemConnection, WorkingCopyState,
};
