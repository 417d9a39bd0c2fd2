//! Dispatcher protocol: typed message envelope and the RPC seam.
//!
//! The run loop only ever sees this interface; the HTTP long-poll client
//! in [`crate::transport`] is one implementation, the in-memory queue used
//! by tests is another.

use rba_common::cancel::CancelToken;
use rba_common::errors::SessionError;
use rba_common::types::{
    AgentCertificateBundle, Credential, ProxySettings, RepositoryDescriptor,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MESSAGE_TYPE_REFRESH: &str = "Refresh";
pub const MESSAGE_TYPE_JOB_REQUEST: &str = "JobRequest";
pub const MESSAGE_TYPE_JOB_CANCEL: &str = "JobCancel";

/// Envelope pulled from the dispatcher queue. The body is opaque until the
/// type is known; types compare case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: u64,
    pub message_type: String,
    #[serde(default)]
    pub body: String,
}

impl AgentMessage {
    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type.eq_ignore_ascii_case(message_type)
    }
}

/// Decoded body of a job-request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequestMessage {
    pub job_id: Uuid,
    #[serde(default)]
    pub job_name: String,
    pub repositories: Vec<RepositoryDescriptor>,
    #[serde(default)]
    pub credential: Credential,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub certificates: AgentCertificateBundle,
}

/// Decoded body of a job-cancel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCancelMessage {
    pub job_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

/// RPC surface of the remote dispatcher.
///
/// Transient transport errors are retried inside implementations; an `Err`
/// out of these methods is fatal to the session.
#[allow(async_fn_in_trait)]
pub trait DispatcherRpc {
    /// Open a session. `Ok(false)` means the dispatcher refused; the agent
    /// terminates with exit code 1.
    async fn create_session(&self, cancel: &CancelToken) -> Result<bool, SessionError>;

    /// Long-poll for the next message. `Ok(None)` when the poll window
    /// elapsed (or the token tripped) without a message.
    async fn get_next_message(
        &self,
        cancel: &CancelToken,
    ) -> Result<Option<AgentMessage>, SessionError>;

    async fn delete_message(
        &self,
        pool_id: u64,
        message_id: u64,
        session_id: Uuid,
    ) -> Result<(), SessionError>;

    /// Best-effort session teardown.
    async fn delete_session(&self) -> Result<(), SessionError>;

    fn session_id(&self) -> Option<Uuid>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_compares_case_insensitively() {
        let msg = AgentMessage {
            message_id: 1,
            message_type: "jobrequest".into(),
            body: String::new(),
        };
        assert!(msg.is_type(MESSAGE_TYPE_JOB_REQUEST));
        assert!(!msg.is_type(MESSAGE_TYPE_JOB_CANCEL));
    }

    #[test]
    fn test_job_request_decodes_with_defaults() {
        let body = r#"{
            "job_id": "3f1c2b4a-9c1d-4c11-9a93-2f8e7a6b5c4d",
            "repositories": [{
                "alias": "src",
                "kind": "github",
                "url": "https://github.com/acme/w.git",
                "branch": "refs/heads/main",
                "target_path": "/work/1/src"
            }]
        }"#;
        let job: JobRequestMessage = serde_json::from_str(body).unwrap();
        assert_eq!(job.repositories.len(), 1);
        assert!(job.credential.is_none());
        assert!(job.proxy.address.is_empty());
    }

    #[test]
    fn test_job_cancel_round_trips() {
        let msg = JobCancelMessage {
            job_id: Uuid::new_v4(),
            reason: Some("user".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: JobCancelMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.job_id, msg.job_id);
    }
}
