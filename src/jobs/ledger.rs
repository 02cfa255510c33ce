//! Job ledger: every submitted job and batch, in submission order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::job::{BatchJob, BatchSnapshot, Job, LedgerEntry, StatusCounts};
use crate::jobs::state::JobStatus;
use crate::store::Database;

#[derive(Debug, Clone, Copy)]
enum EntryRef {
    Job(Uuid),
    Batch(Uuid),
}

/// Pending write-through for the backend.
enum Write {
    Job(Job),
    Batch(BatchJob),
    DeleteJobs(Vec<Uuid>),
    DeleteBatch(Uuid),
}

#[derive(Default)]
struct LedgerInner {
    jobs: HashMap<Uuid, Job>,
    batches: HashMap<Uuid, BatchJob>,
    order: BTreeMap<u64, EntryRef>,
    next_seq: u64,
}

impl LedgerInner {
    fn assign_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn batch_snapshot(&self, batch: &BatchJob) -> BatchSnapshot {
        let children = batch
            .children
            .iter()
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect();
        BatchSnapshot::new(batch, children)
    }

    fn entry(&self, entry: EntryRef) -> Option<LedgerEntry> {
        match entry {
            EntryRef::Job(id) => self.jobs.get(&id).cloned().map(LedgerEntry::Job),
            EntryRef::Batch(id) => self
                .batches
                .get(&id)
                .map(|b| LedgerEntry::Batch(self.batch_snapshot(b))),
        }
    }

    fn is_top_level(&self, entry: &EntryRef) -> bool {
        match entry {
            EntryRef::Job(id) => self.jobs.get(id).is_some_and(|j| j.batch_id.is_none()),
            EntryRef::Batch(_) => true,
        }
    }

    fn is_finished(&self, entry: &EntryRef) -> bool {
        match entry {
            EntryRef::Job(id) => self.jobs.get(id).is_some_and(Job::is_terminal),
            EntryRef::Batch(id) => self.batches.get(id).is_some_and(|b| {
                b.children
                    .iter()
                    .all(|c| self.jobs.get(c).is_none_or(Job::is_terminal))
            }),
        }
    }

    /// Drop the oldest finished top-level entries beyond `retention`.
    fn prune(&mut self, retention: usize) -> Vec<Write> {
        if retention == 0 {
            return Vec::new();
        }
        let top_level: Vec<(u64, EntryRef)> = self
            .order
            .iter()
            .filter(|(_, e)| self.is_top_level(e))
            .map(|(seq, e)| (*seq, *e))
            .collect();
        let mut excess = top_level.len().saturating_sub(retention);
        let mut writes = Vec::new();

        for (seq, entry) in top_level {
            if excess == 0 {
                break;
            }
            if !self.is_finished(&entry) {
                continue;
            }
            self.order.remove(&seq);
            match entry {
                EntryRef::Job(id) => {
                    self.jobs.remove(&id);
                    writes.push(Write::DeleteJobs(vec![id]));
                }
                EntryRef::Batch(id) => {
                    if let Some(batch) = self.batches.remove(&id) {
                        for child in &batch.children {
                            if let Some(job) = self.jobs.remove(child) {
                                self.order.remove(&job.seq);
                            }
                        }
                        writes.push(Write::DeleteJobs(batch.children));
                    }
                    writes.push(Write::DeleteBatch(id));
                }
            }
            excess -= 1;
        }

        if !writes.is_empty() {
            debug!(pruned = writes.len(), "Ledger retention applied");
        }
        writes
    }
}

/// Aggregate counts over the ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSummary {
    /// Jobs of every kind, batch children included.
    pub total: usize,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub batches: usize,
}

/// In-memory job ledger with optional write-through persistence.
pub struct JobLedger {
    inner: RwLock<LedgerInner>,
    /// Orders backend writes the same way as in-memory mutations.
    persist_lock: Mutex<()>,
    db: Option<Arc<dyn Database>>,
    retention: usize,
}

impl JobLedger {
    /// Create a ledger. `retention` caps top-level entries (0 = unbounded).
    pub fn new(db: Option<Arc<dyn Database>>, retention: usize) -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            persist_lock: Mutex::new(()),
            db,
            retention,
        }
    }

    /// Record a new job and return it with its sequence number assigned.
    pub async fn insert_job(&self, mut job: Job) -> Job {
        let mut inner = self.inner.write().await;
        job.seq = inner.assign_seq();
        inner.order.insert(job.seq, EntryRef::Job(job.id));
        inner.jobs.insert(job.id, job.clone());
        let mut writes = vec![Write::Job(job.clone())];
        writes.extend(inner.prune(self.retention));
        self.persist(inner, writes).await;
        job
    }

    /// Record a batch and its children atomically.
    pub async fn insert_batch(&self, mut batch: BatchJob, children: Vec<Job>) -> BatchSnapshot {
        let mut inner = self.inner.write().await;
        batch.seq = inner.assign_seq();
        batch.children = children.iter().map(|c| c.id).collect();
        inner.order.insert(batch.seq, EntryRef::Batch(batch.id));

        let mut writes = vec![Write::Batch(batch.clone())];
        for mut child in children {
            child.seq = inner.assign_seq();
            child.batch_id = Some(batch.id);
            inner.order.insert(child.seq, EntryRef::Job(child.id));
            writes.push(Write::Job(child.clone()));
            inner.jobs.insert(child.id, child);
        }
        let snapshot = inner.batch_snapshot(&batch);
        inner.batches.insert(batch.id, batch);
        writes.extend(inner.prune(self.retention));
        self.persist(inner, writes).await;
        snapshot
    }

    /// Apply a status transition plus any field updates to a job.
    ///
    /// Fails with `InvalidTransition` (leaving the job untouched) when the
    /// job's current status does not allow the move.
    pub async fn transition_job<F>(
        &self,
        id: Uuid,
        status: JobStatus,
        reason: Option<String>,
        apply: F,
    ) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job),
    {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        job.transition_to(status, reason)?;
        apply(job);
        let job = job.clone();

        let mut writes = vec![Write::Job(job.clone())];
        if status.is_terminal() {
            writes.extend(inner.prune(self.retention));
        }
        self.persist(inner, writes).await;
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner.read().await.jobs.get(&id).cloned()
    }

    /// Snapshot of a job or batch.
    pub async fn get(&self, id: Uuid) -> Result<LedgerEntry, JobError> {
        let inner = self.inner.read().await;
        if let Some(job) = inner.jobs.get(&id) {
            return Ok(LedgerEntry::Job(job.clone()));
        }
        inner
            .batches
            .get(&id)
            .map(|b| LedgerEntry::Batch(inner.batch_snapshot(b)))
            .ok_or(JobError::NotFound { id })
    }

    /// Child ids of a batch, or `None` if `id` is not a batch.
    pub async fn batch_children(&self, id: Uuid) -> Option<Vec<Uuid>> {
        self.inner
            .read()
            .await
            .batches
            .get(&id)
            .map(|b| b.children.clone())
    }

    /// Ids of every non-terminal job in submission order.
    pub async fn active_job_ids(&self) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .order
            .values()
            .filter_map(|e| match e {
                EntryRef::Job(id) => inner.jobs.get(id).filter(|j| j.status.is_active()),
                EntryRef::Batch(_) => None,
            })
            .map(|j| j.id)
            .collect()
    }

    /// Every entry, newest first.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        let inner = self.inner.read().await;
        inner
            .order
            .values()
            .rev()
            .filter_map(|e| inner.entry(*e))
            .collect()
    }

    pub async fn summary(&self) -> LedgerSummary {
        let inner = self.inner.read().await;
        LedgerSummary {
            total: inner.jobs.len(),
            counts: StatusCounts::from_statuses(inner.jobs.values().map(|j| &j.status)),
            batches: inner.batches.len(),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }

    /// Restore persisted entries. Jobs that were still in flight when the
    /// previous process stopped are marked Cancelled.
    ///
    /// Returns the number of jobs marked interrupted.
    pub async fn restore(&self, jobs: Vec<Job>, batches: Vec<BatchJob>) -> usize {
        let mut inner = self.inner.write().await;
        let mut writes = Vec::new();
        let mut interrupted = 0;

        for batch in batches {
            inner.next_seq = inner.next_seq.max(batch.seq);
            inner.order.insert(batch.seq, EntryRef::Batch(batch.id));
            inner.batches.insert(batch.id, batch);
        }
        for mut job in jobs {
            if job.status.is_active() {
                let reason = Some("interrupted by restart".to_string());
                if job.transition_to(JobStatus::Cancelled, reason).is_ok() {
                    interrupted += 1;
                    writes.push(Write::Job(job.clone()));
                }
            }
            inner.next_seq = inner.next_seq.max(job.seq);
            inner.order.insert(job.seq, EntryRef::Job(job.id));
            inner.jobs.insert(job.id, job);
        }

        if interrupted > 0 {
            info!(interrupted, "Marked interrupted jobs as cancelled");
        }
        self.persist(inner, writes).await;
        interrupted
    }

    /// Reload everything the backend holds.
    pub async fn load_from_db(&self) -> Result<usize, crate::error::DatabaseError> {
        let Some(ref db) = self.db else {
            return Ok(0);
        };
        let jobs = db.load_jobs().await?;
        let batches = db.load_batches().await?;
        let loaded = jobs.len() + batches.len();
        self.restore(jobs, batches).await;
        Ok(loaded)
    }

    /// Write changes through to the backend in mutation order.
    ///
    /// Backend failures are logged and never roll back the in-memory state.
    async fn persist(&self, guard: RwLockWriteGuard<'_, LedgerInner>, writes: Vec<Write>) {
        let Some(ref db) = self.db else {
            return;
        };
        if writes.is_empty() {
            return;
        }
        let _persist = self.persist_lock.lock().await;
        drop(guard);

        for write in writes {
            let result = match &write {
                Write::Job(job) => db.upsert_job(job).await,
                Write::Batch(batch) => db.upsert_batch(batch).await,
                Write::DeleteJobs(ids) => db.delete_jobs(ids).await,
                Write::DeleteBatch(id) => db.delete_batch(*id).await,
            };
            if let Err(e) = result {
                warn!("Failed to persist ledger change: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    fn scrape(n: usize) -> Job {
        Job::scrape(format!("https://example.com/{n}"), format!("goal {n}"), "http")
    }

    async fn finish(ledger: &JobLedger, id: Uuid, status: JobStatus) {
        ledger
            .transition_job(id, JobStatus::Running, None, |_| {})
            .await
            .unwrap();
        ledger.transition_job(id, status, None, |_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn insert_assigns_increasing_seq() {
        let ledger = JobLedger::new(None, 0);
        let a = ledger.insert_job(scrape(1)).await;
        let b = ledger.insert_job(scrape(2)).await;
        assert!(a.seq < b.seq);
        assert!(matches!(ledger.get(a.id).await, Ok(LedgerEntry::Job(_))));
        assert!(matches!(
            ledger.get(Uuid::new_v4()).await,
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn entries_are_newest_first_and_include_batch_children() {
        let ledger = JobLedger::new(None, 0);
        let single = ledger.insert_job(scrape(0)).await;
        let batch = BatchJob::new();
        let children = vec![
            Job::batch_item(batch.id, "https://a.com", "a", "http"),
            Job::batch_item(batch.id, "https://b.com", "b", "http"),
        ];
        let snapshot = ledger.insert_batch(batch, children).await;
        assert_eq!(snapshot.children.len(), 2);
        assert_eq!(snapshot.status, JobStatus::Running);

        let entries = ledger.entries().await;
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].id(), snapshot.children[1].id);
        assert_eq!(entries[2].id(), snapshot.id);
        assert_eq!(entries[3].id(), single.id);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_job_untouched() {
        let ledger = JobLedger::new(None, 0);
        let job = ledger.insert_job(scrape(1)).await;
        finish(&ledger, job.id, JobStatus::Succeeded).await;

        let err = ledger
            .transition_job(job.id, JobStatus::Cancelled, None, |j| j.error = Some("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        let job = ledger.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn retention_prunes_oldest_finished_entries() {
        let ledger = JobLedger::new(None, 2);
        let first = ledger.insert_job(scrape(1)).await;
        let second = ledger.insert_job(scrape(2)).await;
        finish(&ledger, first.id, JobStatus::Succeeded).await;

        // In-flight entries are never pruned.
        let third = ledger.insert_job(scrape(3)).await;
        assert!(ledger.get_job(first.id).await.is_none());
        assert!(ledger.get_job(second.id).await.is_some());

        let fourth = ledger.insert_job(scrape(4)).await;
        assert_eq!(ledger.len().await, 3);
        finish(&ledger, second.id, JobStatus::Failed).await;
        assert!(ledger.get_job(second.id).await.is_none());
        assert!(ledger.get_job(third.id).await.is_some());
        assert!(ledger.get_job(fourth.id).await.is_some());
    }

    #[tokio::test]
    async fn summary_counts_statuses() {
        let ledger = JobLedger::new(None, 0);
        let a = ledger.insert_job(scrape(1)).await;
        ledger.insert_job(scrape(2)).await;
        finish(&ledger, a.id, JobStatus::Failed).await;

        let summary = ledger.summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.counts.failed, 1);
        assert_eq!(summary.counts.pending, 1);
        assert_eq!(summary.batches, 0);
    }

    #[tokio::test]
    async fn restore_cancels_interrupted_jobs_and_persists() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let ledger = JobLedger::new(Some(Arc::clone(&db)), 0);
        let done = ledger.insert_job(scrape(1)).await;
        finish(&ledger, done.id, JobStatus::Succeeded).await;
        let running = ledger.insert_job(scrape(2)).await;
        ledger
            .transition_job(running.id, JobStatus::Running, None, |_| {})
            .await
            .unwrap();

        let restored = JobLedger::new(Some(Arc::clone(&db)), 0);
        assert_eq!(restored.load_from_db().await.unwrap(), 2);

        let job = restored.get_job(running.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(
            job.transitions.last().unwrap().reason.as_deref(),
            Some("interrupted by restart")
        );
        assert_eq!(
            restored.get_job(done.id).await.unwrap().status,
            JobStatus::Succeeded
        );

        let next = restored.insert_job(scrape(3)).await;
        assert!(next.seq > running.seq);

        let persisted = db.load_jobs().await.unwrap();
        let stored = persisted.iter().find(|j| j.id == running.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
    }
}
