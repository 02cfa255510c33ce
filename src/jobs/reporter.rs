//! Read-only projections over the job ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::job::LedgerEntry;
use crate::jobs::ledger::{JobLedger, LedgerSummary};
use crate::jobs::scheduler::JobEvent;
use crate::jobs::state::JobStatus;

/// Selection criteria for history listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
    /// Only entries created at or after this instant.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.status.is_none_or(|s| entry.status() == s)
            && self.since.is_none_or(|since| entry.created_at() >= since)
    }
}

/// Lazy, single-pass history listing, newest first.
pub struct HistoryIter {
    entries: std::vec::IntoIter<LedgerEntry>,
    filter: HistoryFilter,
    remaining: usize,
}

impl Iterator for HistoryIter {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<LedgerEntry> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.entries.by_ref().find(|e| self.filter.matches(e))?;
        self.remaining -= 1;
        Some(entry)
    }
}

/// Status and history queries for external callers.
#[derive(Clone)]
pub struct StatusReporter {
    ledger: Arc<JobLedger>,
    events: broadcast::Sender<JobEvent>,
}

impl StatusReporter {
    pub fn new(ledger: Arc<JobLedger>, events: broadcast::Sender<JobEvent>) -> Self {
        Self { ledger, events }
    }

    /// Current snapshot of a job or batch.
    pub async fn get_status(&self, id: Uuid) -> Result<LedgerEntry, JobError> {
        self.ledger.get(id).await
    }

    pub async fn list_history(&self, filter: HistoryFilter) -> HistoryIter {
        let remaining = filter.limit.unwrap_or(usize::MAX);
        HistoryIter {
            entries: self.ledger.entries().await.into_iter(),
            filter,
            remaining,
        }
    }

    pub async fn summary(&self) -> LedgerSummary {
        self.ledger.summary().await
    }

    /// Wait until a job or batch reaches a terminal status.
    pub async fn wait_for_terminal(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<LedgerEntry, JobError> {
        let mut events = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let entry = self.ledger.get(id).await?;
            if entry.is_terminal() {
                return Ok(entry);
            }
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return Err(JobError::WaitTimeout { id }),
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
                Ok(Err(RecvError::Closed)) => {
                    let entry = self.ledger.get(id).await?;
                    return if entry.is_terminal() {
                        Ok(entry)
                    } else {
                        Err(JobError::ShutDown)
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::Job;

    async fn reporter() -> (StatusReporter, Arc<JobLedger>, broadcast::Sender<JobEvent>) {
        let ledger = Arc::new(JobLedger::new(None, 0));
        let (tx, _) = broadcast::channel(16);
        (
            StatusReporter::new(Arc::clone(&ledger), tx.clone()),
            ledger,
            tx,
        )
    }

    async fn add(ledger: &JobLedger, n: usize) -> Job {
        ledger
            .insert_job(Job::scrape(format!("https://example.com/{n}"), "goal", "http"))
            .await
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (reporter, _, _) = reporter().await;
        assert!(matches!(
            reporter.get_status(Uuid::new_v4()).await,
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn history_filters_and_limits() {
        let (reporter, ledger, _) = reporter().await;
        let a = add(&ledger, 1).await;
        let b = add(&ledger, 2).await;
        let c = add(&ledger, 3).await;
        ledger
            .transition_job(b.id, JobStatus::Cancelled, None, |_| {})
            .await
            .unwrap();

        let all: Vec<Uuid> = reporter
            .list_history(HistoryFilter::default())
            .await
            .map(|e| e.id())
            .collect();
        assert_eq!(all, vec![c.id, b.id, a.id]);

        let pending: Vec<Uuid> = reporter
            .list_history(HistoryFilter::default().with_status(JobStatus::Pending).limit(1))
            .await
            .map(|e| e.id())
            .collect();
        assert_eq!(pending, vec![c.id]);

        let future = HistoryFilter {
            since: Some(Utc::now() + chrono::Duration::hours(1)),
            ..HistoryFilter::default()
        };
        assert_eq!(reporter.list_history(future).await.count(), 0);
    }

    #[tokio::test]
    async fn wait_for_terminal_wakes_on_event() {
        let (reporter, ledger, tx) = reporter().await;
        let job = add(&ledger, 1).await;

        let waiter = {
            let reporter = reporter.clone();
            tokio::spawn(async move {
                reporter
                    .wait_for_terminal(job.id, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger
            .transition_job(job.id, JobStatus::Cancelled, None, |_| {})
            .await
            .unwrap();
        let _ = tx.send(JobEvent::Cancelled { job_id: job.id });

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.status(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn wait_for_terminal_times_out() {
        let (reporter, ledger, _tx) = reporter().await;
        let job = add(&ledger, 1).await;
        let err = reporter
            .wait_for_terminal(job.id, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::WaitTimeout { .. }));
    }
}
