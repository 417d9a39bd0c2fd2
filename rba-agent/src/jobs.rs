//! Worker dispatcher seam and the in-process implementation.
//!
//! The run loop hands decoded jobs to a [`JobDispatcher`] and never blocks
//! on them; the dispatcher owns the job lifecycle. The in-process
//! implementation runs one source acquisition per repository, each job on
//! its own cancellation token with its own secret registry, so concurrent
//! jobs on disjoint target paths never share credential state.

use rba_common::cancel::CancelToken;
use rba_common::logsink::{BuildLog, TracingLog};
use rba_common::secrets::SecretRegistry;
use rba_common::settings::AgentSettings;
use rba_common::types::SystemConnection;
use rba_sources::acquire::{AcquireContext, SourceAcquirer};
use rba_sources::git::GitCli;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::{JobCancelMessage, JobRequestMessage};

/// Worker dispatcher the run loop routes decoded messages to.
#[allow(async_fn_in_trait)]
pub trait JobDispatcher {
    /// Take ownership of a job. Must not block the run loop.
    async fn run(&self, job: JobRequestMessage);

    /// Request cancellation of a job; `false` when the dispatcher did not
    /// accept the cancel (unknown job, or ownership moved elsewhere).
    async fn cancel(&self, message: &JobCancelMessage) -> bool;

    /// Await in-flight jobs and release resources.
    async fn shutdown(&self);
}

struct RunningJob {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// In-process dispatcher that performs source acquisitions directly.
#[derive(Clone)]
pub struct AcquisitionDispatcher {
    settings: AgentSettings,
    system: SystemConnection,
    jobs: Arc<Mutex<HashMap<Uuid, RunningJob>>>,
}

impl AcquisitionDispatcher {
    pub fn new(settings: AgentSettings, system: SystemConnection) -> Self {
        Self {
            settings,
            system,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

impl JobDispatcher for AcquisitionDispatcher {
    async fn run(&self, job: JobRequestMessage) {
        let job_id = job.job_id;
        let cancel = CancelToken::new();
        let settings = self.settings.clone();
        let system = self.system.clone();
        let jobs = Arc::clone(&self.jobs);

        // The insert below must complete before the task can remove its
        // own entry, so the spawn happens under the lock.
        let mut table = self.jobs.lock().await;
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = execute_job(settings, system, &job, &task_cancel).await {
                error!(job = %job_id, "job failed: {e}");
            }
            jobs.lock().await.remove(&job_id);
        });
        table.insert(job_id, RunningJob { cancel, handle });
        info!(job = %job_id, "job accepted");
    }

    async fn cancel(&self, message: &JobCancelMessage) -> bool {
        let table = self.jobs.lock().await;
        match table.get(&message.job_id) {
            Some(running) => {
                info!(job = %message.job_id, "cancelling job");
                running.cancel.cancel();
                true
            }
            None => {
                warn!(job = %message.job_id, "cancel requested for unknown job");
                false
            }
        }
    }

    async fn shutdown(&self) {
        let drained: Vec<RunningJob> = {
            let mut table = self.jobs.lock().await;
            table.drain().map(|(_, job)| job).collect()
        };
        for job in drained {
            let _ = job.handle.await;
        }
    }
}

async fn execute_job(
    settings: AgentSettings,
    system: SystemConnection,
    job: &JobRequestMessage,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    // One registry per job: everything the acquisitions derive is masked
    // for the job's lifetime.
    let secrets = SecretRegistry::new();
    let log: Arc<dyn BuildLog> = Arc::new(TracingLog::new(secrets.clone()));

    let git = GitCli::locate(&settings, Arc::clone(&log), cancel).await?;
    let acquirer = SourceAcquirer::new(
        git,
        AcquireContext {
            settings,
            system,
            log,
            secrets,
        },
    );

    for repository in &job.repositories {
        info!(
            job = %job.job_id,
            alias = %repository.alias,
            "acquiring {}",
            repository.url
        );
        acquirer
            .acquire(
                repository,
                &job.credential,
                &job.certificates,
                &job.proxy,
                cancel,
            )
            .await?;
    }
    Ok(())
}
