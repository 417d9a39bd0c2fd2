//! HTTP long-poll implementation of the dispatcher RPC.
//!
//! Transient failures are retried here with a capped backoff so the run
//! loop only ever sees messages or fatal session errors.

use rba_common::cancel::CancelToken;
use rba_common::errors::SessionError;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::dispatch::{AgentMessage, DispatcherRpc};

/// Server-side long-poll window; the client allows a margin on top.
const POLL_WINDOW: Duration = Duration::from_secs(50);
const POLL_MARGIN: Duration = Duration::from_secs(10);
/// Backoff between transient-failure retries, capped.
const RETRY_BACKOFF_START: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: Uuid,
}

/// reqwest-backed dispatcher client.
pub struct HttpDispatcherRpc {
    client: reqwest::Client,
    endpoint: Url,
    token: String,
    pool_id: u64,
    session_id: Mutex<Option<Uuid>>,
}

impl HttpDispatcherRpc {
    pub fn new(endpoint: Url, token: String, pool_id: u64) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(POLL_WINDOW + POLL_MARGIN)
            .build()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            token,
            pool_id,
            session_id: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url, SessionError> {
        self.endpoint
            .join(path)
            .map_err(|e| SessionError::Transport(format!("bad endpoint path {path}: {e}")))
    }

    fn current_session(&self) -> Result<Uuid, SessionError> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or(SessionError::SessionRejected)
    }
}

impl DispatcherRpc for HttpDispatcherRpc {
    async fn create_session(&self, cancel: &CancelToken) -> Result<bool, SessionError> {
        let url = self.url(&format!("pools/{}/sessions", self.pool_id))?;
        let mut backoff = RETRY_BACKOFF_START;

        loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let attempt = self
                .client
                .post(url.clone())
                .bearer_auth(&self.token)
                .send()
                .await;
            match attempt {
                Ok(response) if response.status().is_success() => {
                    let session: SessionResponse = response
                        .json()
                        .await
                        .map_err(|e| SessionError::Transport(e.to_string()))?;
                    debug!(session = %session.session_id, "dispatcher session created");
                    *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) =
                        Some(session.session_id);
                    return Ok(true);
                }
                Ok(response) if response.status().is_client_error() => {
                    warn!(status = %response.status(), "dispatcher refused session");
                    return Ok(false);
                }
                Ok(response) => {
                    warn!(status = %response.status(), "session create failed, retrying");
                }
                Err(e) => {
                    warn!("session create transport error, retrying: {e}");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Ok(false),
            }
            backoff = (backoff * 2).min(RETRY_BACKOFF_CAP);
        }
    }

    async fn get_next_message(
        &self,
        cancel: &CancelToken,
    ) -> Result<Option<AgentMessage>, SessionError> {
        let session_id = self.current_session()?;
        let url = self.url(&format!(
            "pools/{}/sessions/{session_id}/messages",
            self.pool_id
        ))?;
        let mut backoff = RETRY_BACKOFF_START;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let request = self.client.get(url.clone()).bearer_auth(&self.token).send();
            let attempt = tokio::select! {
                result = request => result,
                _ = cancel.cancelled() => return Ok(None),
            };
            match attempt {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                    // Poll window elapsed without a message.
                    return Ok(None);
                }
                Ok(response) if response.status().is_success() => {
                    let message: AgentMessage = response
                        .json()
                        .await
                        .map_err(|e| SessionError::Transport(e.to_string()))?;
                    return Ok(Some(message));
                }
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    return Err(SessionError::Transport(
                        "dispatcher rejected the session credential".to_string(),
                    ));
                }
                Ok(response) => {
                    warn!(status = %response.status(), "message poll failed, retrying");
                }
                Err(e) if e.is_timeout() => {
                    // Treated like an empty window; the loop re-polls.
                    return Ok(None);
                }
                Err(e) => {
                    warn!("message poll transport error, retrying: {e}");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
            backoff = (backoff * 2).min(RETRY_BACKOFF_CAP);
        }
    }

    async fn delete_message(
        &self,
        pool_id: u64,
        message_id: u64,
        session_id: Uuid,
    ) -> Result<(), SessionError> {
        let url = self.url(&format!(
            "pools/{pool_id}/sessions/{session_id}/messages/{message_id}"
        ))?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(SessionError::Transport(format!(
                "message delete returned {}",
                response.status()
            )))
        }
    }

    async fn delete_session(&self) -> Result<(), SessionError> {
        let Some(session_id) = self
            .session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return Ok(());
        };
        let url = self.url(&format!("pools/{}/sessions/{session_id}", self.pool_id))?;
        self.client
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(())
    }

    fn session_id(&self) -> Option<Uuid> {
        *self.session_id.lock().unwrap_or_else(|e| e.into_inner())
    }
}
