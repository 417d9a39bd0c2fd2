//! The agent run loop: session, message pump, ack-or-skip semantics.

use rba_common::cancel::CancelToken;
use rba_common::errors::SessionError;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::dispatch::{
    AgentMessage, DispatcherRpc, MESSAGE_TYPE_JOB_CANCEL, MESSAGE_TYPE_JOB_REQUEST,
    MESSAGE_TYPE_REFRESH,
};
use crate::jobs::JobDispatcher;

/// Deadline applied to each message deletion, independent of the poll.
const MESSAGE_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pulls typed messages from the dispatcher session and routes them to the
/// worker dispatcher. Single-threaded cooperative: fetch, dispatch, and
/// deletion are serialized, and the same cancel token is propagated to
/// every downstream call.
pub struct MessageListener<R: DispatcherRpc, D: JobDispatcher> {
    rpc: R,
    dispatcher: D,
    pool_id: u64,
    auto_update_in_progress: bool,
}

impl<R: DispatcherRpc, D: JobDispatcher> MessageListener<R, D> {
    pub fn new(rpc: R, dispatcher: D, pool_id: u64) -> Self {
        Self {
            rpc,
            dispatcher,
            pool_id,
            auto_update_in_progress: false,
        }
    }

    /// Mark a self-update as in flight: refused job cancels are then left
    /// on the queue so they redeliver once the update completes.
    pub fn set_auto_update_in_progress(&mut self, in_progress: bool) {
        self.auto_update_in_progress = in_progress;
    }

    /// Open the dispatcher session. `Ok(false)` means the dispatcher
    /// refused and the agent must terminate with exit code 1.
    pub async fn create_session(&self, cancel: &CancelToken) -> Result<bool, SessionError> {
        self.rpc.create_session(cancel).await
    }

    /// Run the message pump until the token trips, then tear down: shut
    /// down the worker dispatcher (awaiting in-flight jobs) and delete the
    /// session best-effort.
    pub async fn run(&mut self, cancel: &CancelToken) -> Result<(), SessionError> {
        let result = self.pump(cancel).await;

        self.dispatcher.shutdown().await;
        if let Err(e) = self.rpc.delete_session().await {
            warn!("failed to delete dispatcher session: {e}");
        }
        result
    }

    async fn pump(&mut self, cancel: &CancelToken) -> Result<(), SessionError> {
        loop {
            if cancel.is_cancelled() {
                info!("run loop cancelled, draining");
                return Ok(());
            }

            let message = tokio::select! {
                result = self.rpc.get_next_message(cancel) => result?,
                _ = cancel.cancelled() => return Ok(()),
            };
            let Some(message) = message else {
                continue;
            };
            debug!(
                id = message.message_id,
                kind = %message.message_type,
                "message received"
            );

            let skip_deletion = self.handle(&message).await;

            // Deletion always runs unless the handler asked to keep the
            // message; deletion failures are logged, never fatal.
            if !skip_deletion {
                self.delete_message(&message).await;
            }
        }
    }

    /// Dispatch one message. Returns `true` when the message must stay on
    /// the queue for redelivery.
    async fn handle(&mut self, message: &AgentMessage) -> bool {
        if message.is_type(MESSAGE_TYPE_REFRESH) {
            // Reserved for self-update coordination.
            debug!("refresh message acknowledged");
        } else if message.is_type(MESSAGE_TYPE_JOB_REQUEST) {
            match serde_json::from_str(&message.body) {
                Ok(job) => self.dispatcher.run(job).await,
                Err(e) => error!(id = message.message_id, "undecodable job request: {e}"),
            }
        } else if message.is_type(MESSAGE_TYPE_JOB_CANCEL) {
            match serde_json::from_str(&message.body) {
                Ok(job_cancel) => {
                    let accepted = self.dispatcher.cancel(&job_cancel).await;
                    if !accepted && self.auto_update_in_progress {
                        // The job will surface on whichever agent process
                        // survives the update; keep the message alive.
                        info!(
                            id = message.message_id,
                            "cancel not accepted during auto-update, leaving message queued"
                        );
                        return true;
                    }
                }
                Err(e) => error!(id = message.message_id, "undecodable job cancel: {e}"),
            }
        } else {
            warn!(kind = %message.message_type, "unknown message type");
        }
        false
    }

    async fn delete_message(&self, message: &AgentMessage) {
        let Some(session_id) = self.rpc.session_id() else {
            warn!("no session to delete message from");
            return;
        };
        let deletion = self
            .rpc
            .delete_message(self.pool_id, message.message_id, session_id);
        match tokio::time::timeout(MESSAGE_DELETE_TIMEOUT, deletion).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(id = message.message_id, "failed to delete message: {e}"),
            Err(_) => warn!(id = message.message_id, "message deletion timed out"),
        }
    }
}
