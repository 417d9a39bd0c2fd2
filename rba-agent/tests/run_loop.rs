//! Run-loop behavior against in-memory dispatcher seams.

use rba_agent::dispatch::{AgentMessage, DispatcherRpc, JobCancelMessage, JobRequestMessage};
use rba_agent::jobs::JobDispatcher;
use rba_agent::listener::MessageListener;
use rba_common::cancel::CancelToken;
use rba_common::errors::SessionError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ── In-memory dispatcher RPC ───────────────────────────────────────────────

#[derive(Default)]
struct RpcState {
    queue: Mutex<VecDeque<AgentMessage>>,
    deleted: Mutex<Vec<u64>>,
    session: Mutex<Option<Uuid>>,
    session_deleted: AtomicBool,
    accept_session: AtomicBool,
    cancel_when_empty: Mutex<Option<CancelToken>>,
}

#[derive(Clone, Default)]
struct InMemoryRpc {
    state: Arc<RpcState>,
}

impl InMemoryRpc {
    fn new(messages: Vec<AgentMessage>) -> Self {
        let rpc = Self::default();
        rpc.state.accept_session.store(true, Ordering::SeqCst);
        *rpc.state.queue.lock().unwrap() = messages.into();
        rpc
    }

    fn refusing_sessions() -> Self {
        Self::default()
    }

    /// Trip `token` once the queue drains, standing in for an operator
    /// interrupt delivered after the scripted messages.
    fn cancel_when_empty(&self, token: CancelToken) {
        *self.state.cancel_when_empty.lock().unwrap() = Some(token);
    }

    fn deleted(&self) -> Vec<u64> {
        self.state.deleted.lock().unwrap().clone()
    }

    fn session_deleted(&self) -> bool {
        self.state.session_deleted.load(Ordering::SeqCst)
    }
}

impl DispatcherRpc for InMemoryRpc {
    async fn create_session(&self, _cancel: &CancelToken) -> Result<bool, SessionError> {
        if !self.state.accept_session.load(Ordering::SeqCst) {
            return Ok(false);
        }
        *self.state.session.lock().unwrap() = Some(Uuid::new_v4());
        Ok(true)
    }

    async fn get_next_message(
        &self,
        _cancel: &CancelToken,
    ) -> Result<Option<AgentMessage>, SessionError> {
        let next = self.state.queue.lock().unwrap().pop_front();
        if next.is_none()
            && let Some(token) = self.state.cancel_when_empty.lock().unwrap().as_ref()
        {
            token.cancel();
        }
        Ok(next)
    }

    async fn delete_message(
        &self,
        _pool_id: u64,
        message_id: u64,
        _session_id: Uuid,
    ) -> Result<(), SessionError> {
        self.state.deleted.lock().unwrap().push(message_id);
        Ok(())
    }

    async fn delete_session(&self) -> Result<(), SessionError> {
        self.state.session_deleted.store(true, Ordering::SeqCst);
        *self.state.session.lock().unwrap() = None;
        Ok(())
    }

    fn session_id(&self) -> Option<Uuid> {
        *self.state.session.lock().unwrap()
    }
}

// ── Recording worker dispatcher ────────────────────────────────────────────

struct DispatcherState {
    events: Mutex<Vec<String>>,
    accept_cancel: bool,
    shutdown_called: AtomicBool,
}

#[derive(Clone)]
struct RecordingDispatcher {
    state: Arc<DispatcherState>,
}

impl RecordingDispatcher {
    fn new(accept_cancel: bool) -> Self {
        Self {
            state: Arc::new(DispatcherState {
                events: Mutex::new(Vec::new()),
                accept_cancel,
                shutdown_called: AtomicBool::new(false),
            }),
        }
    }

    fn events(&self) -> Vec<String> {
        self.state.events.lock().unwrap().clone()
    }

    fn shutdown_called(&self) -> bool {
        self.state.shutdown_called.load(Ordering::SeqCst)
    }
}

impl JobDispatcher for RecordingDispatcher {
    async fn run(&self, job: JobRequestMessage) {
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("run {}", job.job_id));
    }

    async fn cancel(&self, message: &JobCancelMessage) -> bool {
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("cancel {}", message.job_id));
        self.state.accept_cancel
    }

    async fn shutdown(&self) {
        self.state.shutdown_called.store(true, Ordering::SeqCst);
    }
}

// ── Message builders ───────────────────────────────────────────────────────

fn job_request_message(message_id: u64, job_id: Uuid) -> AgentMessage {
    let body = serde_json::to_string(&JobRequestMessage {
        job_id,
        job_name: "build".into(),
        repositories: vec![],
        credential: Default::default(),
        proxy: Default::default(),
        certificates: Default::default(),
    })
    .unwrap();
    AgentMessage {
        message_id,
        message_type: "JobRequest".into(),
        body,
    }
}

fn job_cancel_message(message_id: u64, job_id: Uuid) -> AgentMessage {
    let body = serde_json::to_string(&JobCancelMessage {
        job_id,
        reason: None,
    })
    .unwrap();
    AgentMessage {
        message_id,
        message_type: "JobCancel".into(),
        body,
    }
}

// ── Scenarios ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_then_cancel_then_drain() {
    let job_id = Uuid::new_v4();
    let rpc = InMemoryRpc::new(vec![
        job_request_message(1, job_id),
        job_cancel_message(2, job_id),
    ]);
    let dispatcher = RecordingDispatcher::new(true);
    let cancel = CancelToken::new();
    rpc.cancel_when_empty(cancel.clone());

    let mut listener = MessageListener::new(rpc.clone(), dispatcher.clone(), 1);
    assert!(listener.create_session(&cancel).await.unwrap());
    listener.run(&cancel).await.unwrap();

    assert_eq!(rpc.deleted(), vec![1, 2]);
    assert_eq!(
        dispatcher.events(),
        vec![format!("run {job_id}"), format!("cancel {job_id}")]
    );
    assert!(dispatcher.shutdown_called());
    assert!(rpc.session_deleted());
}

#[tokio::test]
async fn test_refused_cancel_during_auto_update_is_not_deleted() {
    let job_id = Uuid::new_v4();
    let rpc = InMemoryRpc::new(vec![job_cancel_message(7, job_id)]);
    let dispatcher = RecordingDispatcher::new(false);
    let cancel = CancelToken::new();
    rpc.cancel_when_empty(cancel.clone());

    let mut listener = MessageListener::new(rpc.clone(), dispatcher.clone(), 1);
    assert!(listener.create_session(&cancel).await.unwrap());
    listener.set_auto_update_in_progress(true);
    listener.run(&cancel).await.unwrap();

    // The message must redeliver after the update completes.
    assert!(rpc.deleted().is_empty(), "deleted: {:?}", rpc.deleted());
    assert_eq!(dispatcher.events(), vec![format!("cancel {job_id}")]);
}

#[tokio::test]
async fn test_refused_cancel_without_auto_update_is_deleted() {
    let job_id = Uuid::new_v4();
    let rpc = InMemoryRpc::new(vec![job_cancel_message(7, job_id)]);
    let dispatcher = RecordingDispatcher::new(false);
    let cancel = CancelToken::new();
    rpc.cancel_when_empty(cancel.clone());

    let mut listener = MessageListener::new(rpc.clone(), dispatcher.clone(), 1);
    assert!(listener.create_session(&cancel).await.unwrap());
    listener.run(&cancel).await.unwrap();

    assert_eq!(rpc.deleted(), vec![7]);
}

#[tokio::test]
async fn test_refresh_and_unknown_messages_are_acknowledged() {
    let rpc = InMemoryRpc::new(vec![
        AgentMessage {
            message_id: 1,
            message_type: "refresh".into(),
            body: String::new(),
        },
        AgentMessage {
            message_id: 2,
            message_type: "SomethingNew".into(),
            body: "{}".into(),
        },
    ]);
    let dispatcher = RecordingDispatcher::new(true);
    let cancel = CancelToken::new();
    rpc.cancel_when_empty(cancel.clone());

    let mut listener = MessageListener::new(rpc.clone(), dispatcher.clone(), 1);
    assert!(listener.create_session(&cancel).await.unwrap());
    listener.run(&cancel).await.unwrap();

    assert_eq!(rpc.deleted(), vec![1, 2]);
    assert!(dispatcher.events().is_empty());
}

#[tokio::test]
async fn test_undecodable_job_request_is_deleted_not_fatal() {
    let rpc = InMemoryRpc::new(vec![AgentMessage {
        message_id: 3,
        message_type: "JobRequest".into(),
        body: "{not json".into(),
    }]);
    let dispatcher = RecordingDispatcher::new(true);
    let cancel = CancelToken::new();
    rpc.cancel_when_empty(cancel.clone());

    let mut listener = MessageListener::new(rpc.clone(), dispatcher.clone(), 1);
    assert!(listener.create_session(&cancel).await.unwrap());
    listener.run(&cancel).await.unwrap();

    assert_eq!(rpc.deleted(), vec![3]);
    assert!(dispatcher.events().is_empty());
}

#[tokio::test]
async fn test_refused_session_reports_false() {
    let rpc = InMemoryRpc::refusing_sessions();
    let dispatcher = RecordingDispatcher::new(true);
    let cancel = CancelToken::new();

    let listener = MessageListener::new(rpc, dispatcher, 1);
    assert!(!listener.create_session(&cancel).await.unwrap());
}

#[tokio::test]
async fn test_pre_tripped_cancel_skips_polling() {
    let job_id = Uuid::new_v4();
    let rpc = InMemoryRpc::new(vec![job_request_message(1, job_id)]);
    let dispatcher = RecordingDispatcher::new(true);
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut listener = MessageListener::new(rpc.clone(), dispatcher.clone(), 1);
    assert!(listener.create_session(&cancel).await.unwrap());
    listener.run(&cancel).await.unwrap();

    assert!(rpc.deleted().is_empty());
    assert!(dispatcher.events().is_empty());
    assert!(dispatcher.shutdown_called());
    assert!(rpc.session_deleted());
}
