//! Job and batch records kept in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::state::{JobStatus, StateTransition};

/// Cap on the per-job transition history.
const MAX_TRANSITIONS: usize = 200;

/// What a job was submitted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scrape,
    BatchItem,
    ToolExec,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::BatchItem => "batch_item",
            Self::ToolExec => "tool_exec",
        }
    }
}

/// One unit of scrape or tool work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Ledger insertion order.
    pub seq: u64,
    pub kind: JobKind,
    pub batch_id: Option<Uuid>,
    pub url: Option<String>,
    pub goal: Option<String>,
    /// Tool that executes the job.
    pub tool_name: Option<String>,
    /// Input handed to the tool.
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of times a worker has started the job.
    pub attempts: u32,
    pub result: Option<serde_json::Value>,
    /// Last error message.
    pub error: Option<String>,
    pub transitions: Vec<StateTransition>,
}

impl Job {
    fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            kind,
            batch_id: None,
            url: None,
            goal: None,
            tool_name: None,
            input: serde_json::Value::Null,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempts: 0,
            result: None,
            error: None,
            transitions: Vec::new(),
        }
    }

    /// A scrape of `url` for `goal`, executed by `tool`.
    pub fn scrape(url: impl Into<String>, goal: impl Into<String>, tool: impl Into<String>) -> Self {
        let url = url.into();
        let goal = goal.into();
        Self {
            input: serde_json::json!({ "url": url, "goal": goal }),
            url: Some(url),
            goal: Some(goal),
            tool_name: Some(tool.into()),
            ..Self::new(JobKind::Scrape)
        }
    }

    /// A scrape that belongs to a batch.
    pub fn batch_item(
        batch_id: Uuid,
        url: impl Into<String>,
        goal: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            kind: JobKind::BatchItem,
            batch_id: Some(batch_id),
            ..Self::scrape(url, goal, tool)
        }
    }

    /// A direct tool invocation.
    pub fn tool_exec(tool: impl Into<String>, input: serde_json::Value) -> Self {
        let url = input
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let goal = input
            .get("goal")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Self {
            url,
            goal,
            tool_name: Some(tool.into()),
            input,
            ..Self::new(JobKind::ToolExec)
        }
    }

    /// Apply a status transition, recording it in the history.
    pub fn transition_to(
        &mut self,
        new_status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobError> {
        if !self.status.can_transition_to(new_status) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                state: self.status.to_string(),
                target: new_status.to_string(),
            });
        }

        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.status,
            to: new_status,
            timestamp: now,
            reason,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;

        match new_status {
            JobStatus::Running => {
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => {
                self.finished_at = Some(now);
            }
            JobStatus::Pending => {}
        }

        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A group of scrape jobs submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub seq: u64,
    /// Child job ids in submission order.
    pub children: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            children: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

impl Default for BatchJob {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of children in each status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(*status);
        }
        counts
    }

    pub fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.cancelled
    }

    /// Aggregate status of a batch with these child counts.
    ///
    /// Running while any child is in flight; Succeeded only if every child
    /// succeeded; otherwise Failed if any child failed, else Cancelled.
    pub fn aggregate(&self) -> JobStatus {
        if self.pending + self.running > 0 {
            JobStatus::Running
        } else if self.succeeded == self.total() {
            JobStatus::Succeeded
        } else if self.failed > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Cancelled
        }
    }
}

/// Point-in-time view of a batch with per-child outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub id: Uuid,
    pub seq: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Latest child finish time once every child is terminal.
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: StatusCounts,
    pub children: Vec<Job>,
}

impl BatchSnapshot {
    pub fn new(batch: &BatchJob, children: Vec<Job>) -> Self {
        let counts = StatusCounts::from_statuses(children.iter().map(|c| &c.status));
        let status = counts.aggregate();
        let finished_at = if status.is_terminal() {
            children.iter().filter_map(|c| c.finished_at).max()
        } else {
            None
        };
        Self {
            id: batch.id,
            seq: batch.seq,
            status,
            created_at: batch.created_at,
            finished_at,
            counts,
            children,
        }
    }

    pub fn child_ids(&self) -> Vec<Uuid> {
        self.children.iter().map(|c| c.id).collect()
    }
}

/// A ledger entry as exposed to status and history callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    Job(Job),
    Batch(BatchSnapshot),
}

impl LedgerEntry {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Job(job) => job.id,
            Self::Batch(batch) => batch.id,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Job(job) => job.seq,
            Self::Batch(batch) => batch.seq,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Job(job) => job.status,
            Self::Batch(batch) => batch.status,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Job(job) => job.created_at,
            Self::Batch(batch) => batch.created_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_transitions_set_timestamps_and_attempts() {
        let mut job = Job::scrape("https://example.com", "titles", "http");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.input["goal"], "titles");

        job.transition_to(JobStatus::Running, None).unwrap();
        assert_eq!(job.attempts, 1);
        let started = job.started_at;
        assert!(started.is_some());

        job.transition_to(JobStatus::Pending, Some("retry".into())).unwrap();
        job.transition_to(JobStatus::Running, None).unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.started_at, started);

        job.transition_to(JobStatus::Succeeded, None).unwrap();
        assert!(job.finished_at.is_some());
        assert_eq!(job.transitions.len(), 4);
    }

    #[test]
    fn terminal_job_rejects_transitions() {
        let mut job = Job::tool_exec("echo", serde_json::json!({}));
        job.transition_to(JobStatus::Cancelled, None).unwrap();
        let err = job.transition_to(JobStatus::Running, None).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn transition_history_capped() {
        let mut job = Job::scrape("https://example.com", "cap", "http");
        for _ in 0..150 {
            job.transition_to(JobStatus::Running, None).unwrap();
            job.transition_to(JobStatus::Pending, None).unwrap();
        }
        assert!(
            job.transitions.len() <= 200,
            "transitions should be capped at 200, got {}",
            job.transitions.len()
        );
        assert_eq!(job.attempts, 150);
    }

    #[test]
    fn tool_exec_picks_up_url_and_goal() {
        let job = Job::tool_exec(
            "http",
            serde_json::json!({"url": "https://example.com", "goal": "title"}),
        );
        assert_eq!(job.url.as_deref(), Some("https://example.com"));
        assert_eq!(job.goal.as_deref(), Some("title"));
        assert_eq!(job.kind, JobKind::ToolExec);
    }

    #[test]
    fn batch_aggregate_status() {
        use JobStatus::*;
        let agg = |s: &[JobStatus]| StatusCounts::from_statuses(s).aggregate();
        assert_eq!(agg(&[Succeeded, Running]), Running);
        assert_eq!(agg(&[Succeeded, Pending]), Running);
        assert_eq!(agg(&[Succeeded, Succeeded]), Succeeded);
        assert_eq!(agg(&[Succeeded, Failed]), Failed);
        assert_eq!(agg(&[Cancelled, Failed]), Failed);
        assert_eq!(agg(&[Succeeded, Cancelled]), Cancelled);
    }

    #[test]
    fn batch_snapshot_reports_children() {
        let mut batch = BatchJob::new();
        let mut ok = Job::batch_item(batch.id, "https://a.com", "a", "http");
        let mut bad = Job::batch_item(batch.id, "https://b.com", "b", "http");
        batch.children = vec![ok.id, bad.id];
        ok.transition_to(JobStatus::Running, None).unwrap();
        ok.transition_to(JobStatus::Succeeded, None).unwrap();
        bad.transition_to(JobStatus::Running, None).unwrap();
        bad.transition_to(JobStatus::Failed, None).unwrap();

        let snapshot = BatchSnapshot::new(&batch, vec![ok, bad]);
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.counts.succeeded, 1);
        assert_eq!(snapshot.counts.failed, 1);
        assert!(snapshot.finished_at.is_some());
        assert_eq!(snapshot.child_ids(), batch.children);
    }

    #[test]
    fn ledger_entry_is_tagged() {
        let entry = LedgerEntry::Job(Job::scrape("https://a.com", "a", "http"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "job");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["kind"], "scrape");
    }
}
