//! RBA build agent: dispatcher session and job run loop.
//!
//! The binary wires the pieces together; the library surface exists so the
//! run loop can be exercised against in-memory seams.

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod jobs;
pub mod listener;
pub mod transport;

pub use dispatch::{AgentMessage, DispatcherRpc, JobCancelMessage, JobRequestMessage};
pub use jobs::{AcquisitionDispatcher, JobDispatcher};
pub use listener::MessageListener;
pub use transport::HttpDispatcherRpc;
