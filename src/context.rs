//! Job context handed to tools during execution.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context for one execution attempt of a job.
///
/// Tools that run for a long time should check [`JobContext::is_cancelled`]
/// at safe points and return early once it flips.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job being executed.
    pub job_id: Uuid,
    /// Batch the job belongs to, if any.
    pub batch_id: Option<Uuid>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Target URL for scrape jobs.
    pub url: Option<String>,
    /// Goal text for scrape jobs.
    pub goal: Option<String>,
    cancel: CancellationToken,
}

impl JobContext {
    /// Create a context for a job attempt.
    pub fn new(job_id: Uuid, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            batch_id: None,
            attempt,
            url: None,
            goal: None,
            cancel,
        }
    }

    pub fn with_target(mut self, url: Option<String>, goal: Option<String>) -> Self {
        self.url = url;
        self.goal = goal;
        self
    }

    pub fn with_batch(mut self, batch_id: Option<Uuid>) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// Whether cancellation has been requested for this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new(Uuid::new_v4(), 1, CancellationToken::new())
    }
}
