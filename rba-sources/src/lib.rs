//! Source-acquisition core for the RBA build agent.
//!
//! Given a repository descriptor and credentials, prepares a working copy
//! of a remote source tree in a state ready for compilation: probes and
//! reconciles existing on-disk state, negotiates the authentication
//! strategy per provider, drives the git binary (and its LFS extension)
//! with per-invocation credential injection, and scrubs everything it
//! injected on the way out.

#![forbid(unsafe_code)]

pub mod acquire;
pub mod askpass;
pub mod config_state;
pub mod git;
pub mod provider;
pub mod testkit;
pub mod version;

pub use acquire::{AcquireContext, SourceAcquirer, is_pull_request_ref, to_remote_ref};
pub use config_state::ConfigModifications;
pub use git::{Git, GitCli};
pub use provider::ProviderPolicy;
pub use version::GitVersion;
