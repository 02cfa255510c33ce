//! Job scheduler: submission, the worker pool, retries and cancellation.
//!
//! Submissions are recorded in the ledger as Pending and their ids pushed
//! onto a FIFO queue shared by a fixed set of worker tasks. A failed attempt
//! with retry budget left goes back to Pending and is re-queued by a timer
//! task once its backoff elapses, so the worker is free in the meantime.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::context::JobContext;
use crate::error::{Error, JobError, ToolError};
use crate::jobs::job::{BatchJob, BatchSnapshot, Job, JobKind, LedgerEntry};
use crate::jobs::ledger::JobLedger;
use crate::jobs::state::JobStatus;
use crate::memory::observation::NewObservation;
use crate::memory::store::MemoryStore;
use crate::memory::text::{normalize_url, parse_web_url};
use crate::tools::{ToolOutput, ToolRegistry};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 1024;

/// One `(url, goal)` pair of a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub url: String,
    pub goal: String,
}

impl ScrapeTarget {
    pub fn new(url: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            goal: goal.into(),
        }
    }
}

/// Job lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Queued {
        job_id: Uuid,
        batch_id: Option<Uuid>,
    },
    Started {
        job_id: Uuid,
        attempt: u32,
    },
    Retrying {
        job_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Succeeded {
        job_id: Uuid,
    },
    Failed {
        job_id: Uuid,
        error: String,
    },
    Cancelled {
        job_id: Uuid,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Queued { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Succeeded { job_id }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// State shared by the scheduler handle, workers and retry timers.
struct Shared {
    config: AgentConfig,
    tools: Arc<ToolRegistry>,
    ledger: Arc<JobLedger>,
    memory: Arc<MemoryStore>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
    /// Cancellation tokens of jobs currently claimed by a worker.
    running: RwLock<HashMap<Uuid, CancellationToken>>,
    /// Per-job locks serializing a success commit against cancellation, so a
    /// cancelled job never records an observation. Entries live only while
    /// some caller holds or awaits them.
    finalize: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    events: broadcast::Sender<JobEvent>,
    shutdown: CancellationToken,
}

/// Accepts submissions and runs them on a bounded worker pool.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn `config.worker_count` workers and return the scheduler handle.
    pub fn start(
        config: AgentConfig,
        tools: Arc<ToolRegistry>,
        ledger: Arc<JobLedger>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let worker_count = config.worker_count.max(1);

        let shared = Arc::new(Shared {
            config,
            tools,
            ledger,
            memory,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            running: RwLock::new(HashMap::new()),
            finalize: Mutex::new(HashMap::new()),
            events,
            shutdown: CancellationToken::new(),
        });

        let workers = (0..worker_count)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.worker_loop(worker_id).await })
            })
            .collect();

        info!(workers = worker_count, "Scheduler started");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a single scrape job.
    pub async fn submit_scrape(&self, url: &str, goal: &str) -> Result<Job, Error> {
        self.ensure_running()?;
        let target = validate_target(url, goal)?;
        let job = Job::scrape(target.url, target.goal, &self.shared.config.scrape_tool);
        let job = self.shared.ledger.insert_job(job).await;
        self.abort_if_shut_down(&[job.id]).await?;
        self.shared.enqueue(&job)?;
        Ok(job)
    }

    /// Submit a batch of scrape jobs. All targets are validated before
    /// anything is recorded.
    pub async fn submit_batch(&self, targets: Vec<ScrapeTarget>) -> Result<BatchSnapshot, Error> {
        self.ensure_running()?;
        if targets.is_empty() {
            return Err(Error::invalid("batch must contain at least one target"));
        }
        let max = self.shared.config.max_batch_size;
        if max > 0 && targets.len() > max {
            return Err(Error::invalid(format!(
                "batch of {} targets exceeds the maximum of {max}",
                targets.len()
            )));
        }

        let validated = targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                validate_target(&t.url, &t.goal)
                    .map_err(|e| Error::invalid(format!("target {i}: {}", invalid_message(e))))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let batch = BatchJob::new();
        let tool = &self.shared.config.scrape_tool;
        let children = validated
            .into_iter()
            .map(|t| Job::batch_item(batch.id, t.url, t.goal, tool))
            .collect();
        let snapshot = self.shared.ledger.insert_batch(batch, children).await;
        self.abort_if_shut_down(&snapshot.child_ids()).await?;

        for child in &snapshot.children {
            self.shared.enqueue(child)?;
        }
        info!(batch_id = %snapshot.id, children = snapshot.children.len(), "Batch submitted");
        Ok(snapshot)
    }

    /// Submit a direct tool execution. Unknown tools fail before anything
    /// is recorded.
    pub async fn execute_tool(&self, name: &str, input: serde_json::Value) -> Result<Job, Error> {
        self.ensure_running()?;
        self.shared.tools.resolve(name)?;
        let input = match input {
            serde_json::Value::Null => serde_json::json!({}),
            serde_json::Value::Object(_) => input,
            _ => return Err(Error::invalid("tool input must be a JSON object")),
        };
        let job = self
            .shared
            .ledger
            .insert_job(Job::tool_exec(name, input))
            .await;
        self.abort_if_shut_down(&[job.id]).await?;
        self.shared.enqueue(&job)?;
        Ok(job)
    }

    /// Cancel a job, or every unfinished child of a batch.
    ///
    /// Terminal jobs are left untouched. A running job is marked Cancelled
    /// right away and its executor is signalled; whatever it returns later is
    /// discarded.
    pub async fn cancel(&self, id: Uuid) -> Result<LedgerEntry, Error> {
        match self.shared.ledger.batch_children(id).await {
            Some(children) => {
                for child in children {
                    self.shared.cancel_job(child, "cancelled by request").await;
                }
            }
            None => {
                if self.shared.ledger.get_job(id).await.is_none() {
                    return Err(JobError::NotFound { id }.into());
                }
                self.shared.cancel_job(id, "cancelled by request").await;
            }
        }
        Ok(self.shared.ledger.get(id).await?)
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Sender side of the event channel, for read-only observers.
    pub fn events(&self) -> broadcast::Sender<JobEvent> {
        self.shared.events.clone()
    }

    /// Stop the workers, signal in-flight executors and cancel whatever is
    /// still queued.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        for id in self.shared.ledger.active_job_ids().await {
            self.shared.cancel_job(id, "scheduler shut down").await;
        }
        info!("Scheduler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    fn ensure_running(&self) -> Result<(), JobError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(JobError::ShutDown);
        }
        Ok(())
    }

    /// Cancel just-recorded jobs when shutdown started after `ensure_running`
    /// passed. Its sweep may already be over and would never see them.
    async fn abort_if_shut_down(&self, ids: &[Uuid]) -> Result<(), JobError> {
        if !self.shared.shutdown.is_cancelled() {
            return Ok(());
        }
        for &id in ids {
            self.shared.cancel_job(id, "scheduler shut down").await;
        }
        Err(JobError::ShutDown)
    }
}

impl Shared {
    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Announce before sending so `Queued` always precedes `Started`.
    fn enqueue(&self, job: &Job) -> Result<(), JobError> {
        self.emit(JobEvent::Queued {
            job_id: job.id,
            batch_id: job.batch_id,
        });
        self.queue_tx.send(job.id).map_err(|_| JobError::ShutDown)?;
        debug!(job_id = %job.id, kind = job.kind.as_str(), "Job queued");
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Worker started");
        loop {
            let next = {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    id = rx.recv() => id,
                }
            };
            let Some(job_id) = next else {
                break;
            };
            self.run_job(job_id, worker_id).await;
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Run one attempt of a job to completion, failure or cancellation.
    async fn run_job(&self, job_id: Uuid, worker_id: usize) {
        let token = self.shutdown.child_token();
        self.running.write().await.insert(job_id, token.clone());

        let job = match self
            .ledger
            .transition_job(job_id, JobStatus::Running, None, |_| {})
            .await
        {
            Ok(job) => job,
            Err(e) => {
                // Cancelled while queued, or pruned.
                debug!(job_id = %job_id, "Skipping queued job: {}", e);
                self.running.write().await.remove(&job_id);
                return;
            }
        };

        debug!(job_id = %job_id, worker_id, attempt = job.attempts, "Job started");
        self.emit(JobEvent::Started {
            job_id,
            attempt: job.attempts,
        });

        let outcome = self.execute(&job, &token).await;
        self.running.write().await.remove(&job_id);

        if token.is_cancelled() {
            // Explicit cancel already marked the job; shutdown has not.
            self.cancel_job(job_id, "scheduler shut down").await;
            return;
        }

        match outcome {
            Ok(output) => self.complete(job, output).await,
            Err(e) => self.fail_attempt(job, e).await,
        }
    }

    async fn execute(&self, job: &Job, token: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let name = job
            .tool_name
            .clone()
            .unwrap_or_else(|| self.config.scrape_tool.clone());
        let tool = self.tools.resolve(&name)?;
        let ctx = JobContext::new(job.id, job.attempts, token.clone())
            .with_target(job.url.clone(), job.goal.clone())
            .with_batch(job.batch_id);

        let timeout = tool.execution_timeout().unwrap_or(self.config.job_timeout);
        match tokio::time::timeout(timeout, tool.execute(job.input.clone(), &ctx)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(crate::tools::ToolError::InvalidParameters(reason))) => {
                Err(ToolError::InvalidParameters { name, reason })
            }
            Ok(Err(e)) => Err(ToolError::ExecutionFailed {
                name,
                reason: e.to_string(),
            }),
            Err(_) => Err(ToolError::Timeout { name, timeout }),
        }
    }

    /// Lock finalization of one job. Other jobs are not blocked.
    async fn finalize_guard(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.finalize.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the guard and forget the lock once nobody else refers to it.
    async fn release_finalize(&self, id: Uuid, guard: OwnedMutexGuard<()>) {
        let mut locks = self.finalize.lock().await;
        drop(guard);
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    async fn complete(&self, job: Job, output: ToolOutput) {
        let id = job.id;
        let guard = self.finalize_guard(id).await;
        self.commit_success(job, output).await;
        self.release_finalize(id, guard).await;
    }

    async fn commit_success(&self, job: Job, output: ToolOutput) {
        let still_running = self
            .ledger
            .get_job(job.id)
            .await
            .is_some_and(|j| j.status == JobStatus::Running);
        if !still_running {
            info!(job_id = %job.id, "Discarding result of job cancelled while running");
            return;
        }

        if let Some(observation) = self.observation_for(&job, &output) {
            if let Err(e) = self.memory.append(observation).await {
                warn!(job_id = %job.id, "Failed to record observation: {}", e);
            }
        }

        let result = output.result;
        match self
            .ledger
            .transition_job(job.id, JobStatus::Succeeded, None, |j| {
                j.result = Some(result);
                j.error = None;
            })
            .await
        {
            Ok(done) => {
                info!(
                    job_id = %done.id,
                    attempts = done.attempts,
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Job succeeded"
                );
                self.emit(JobEvent::Succeeded { job_id: done.id });
            }
            Err(e) => warn!(job_id = %job.id, "Could not mark job succeeded: {}", e),
        }
    }

    async fn fail_attempt(&self, job: Job, error: ToolError) {
        let message = error.to_string();
        let retryable = matches!(
            error,
            ToolError::ExecutionFailed { .. } | ToolError::Timeout { .. }
        );

        if retryable && job.attempts <= self.config.max_retries {
            let delay = self.config.backoff_for(job.attempts);
            let recorded = message.clone();
            let retried = self
                .ledger
                .transition_job(job.id, JobStatus::Pending, Some(message.clone()), |j| {
                    j.error = Some(recorded);
                })
                .await;
            if retried.is_err() {
                return;
            }

            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                "Job attempt failed, retrying: {}",
                message
            );
            self.emit(JobEvent::Retrying {
                job_id: job.id,
                attempt: job.attempts,
                delay_ms: delay.as_millis() as u64,
                error: message,
            });

            let queue = self.queue_tx.clone();
            let shutdown = self.shutdown.clone();
            let job_id = job.id;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        if queue.send(job_id).is_err() {
                            debug!(job_id = %job_id, "Queue closed before retry");
                        }
                    }
                    _ = shutdown.cancelled() => {}
                }
            });
            return;
        }

        let recorded = message.clone();
        match self
            .ledger
            .transition_job(job.id, JobStatus::Failed, Some(message.clone()), |j| {
                j.error = Some(recorded);
            })
            .await
        {
            Ok(failed) => {
                warn!(job_id = %failed.id, attempts = failed.attempts, "Job failed: {}", message);
                self.emit(JobEvent::Failed {
                    job_id: failed.id,
                    error: message,
                });
            }
            Err(e) => debug!(job_id = %job.id, "Dropping failure of finished job: {}", e),
        }
    }

    /// Mark a job Cancelled if it has not finished and signal its executor.
    async fn cancel_job(&self, id: Uuid, reason: &str) -> bool {
        let guard = self.finalize_guard(id).await;
        let cancelled = self
            .ledger
            .transition_job(id, JobStatus::Cancelled, Some(reason.to_string()), |_| {})
            .await
            .is_ok();

        if let Some(token) = self.running.read().await.get(&id) {
            token.cancel();
        }
        if cancelled {
            info!(job_id = %id, reason, "Job cancelled");
            self.emit(JobEvent::Cancelled { job_id: id });
        }
        self.release_finalize(id, guard).await;
        cancelled
    }

    /// Observation to record for a successful job, if any.
    fn observation_for(&self, job: &Job, output: &ToolOutput) -> Option<NewObservation> {
        if !output.has_content() {
            return None;
        }
        if job.kind == JobKind::ToolExec && !self.config.record_tool_observations {
            return None;
        }

        let topic = job
            .goal
            .clone()
            .filter(|g| !g.trim().is_empty())
            .or_else(|| job.tool_name.clone())?;
        let mut observation =
            NewObservation::new(topic, output.result.clone()).with_source_job(job.id);
        if let Some(url) = job.url.as_deref().and_then(normalize_url) {
            observation = observation.with_url(url);
        }
        Some(observation)
    }
}

/// Check a scrape target and return it trimmed.
fn validate_target(url: &str, goal: &str) -> Result<ScrapeTarget, Error> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::invalid("url must not be empty"));
    }
    if parse_web_url(url).is_none() {
        return Err(Error::invalid(format!("'{url}' is not a valid http(s) URL")));
    }
    let goal = goal.trim();
    if goal.is_empty() {
        return Err(Error::invalid("goal must not be empty"));
    }
    Ok(ScrapeTarget::new(url, goal))
}

fn invalid_message(error: Error) -> String {
    match error {
        Error::InvalidRequest(message) => message,
        other => other.to_string(),
    }
}
