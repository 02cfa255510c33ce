//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::job::{BatchJob, Job};
use crate::memory::observation::Observation;

/// Backend-agnostic database trait covering memory and the job ledger.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Observations ────────────────────────────────────────────────

    /// Append an observation. Observations are never updated.
    async fn insert_observation(&self, observation: &Observation) -> Result<(), DatabaseError>;

    /// All observations ordered by sequence number.
    async fn load_observations(&self) -> Result<Vec<Observation>, DatabaseError>;

    // ── Job ledger ──────────────────────────────────────────────────

    /// Insert or replace a job record.
    async fn upsert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Insert or replace a batch record.
    async fn upsert_batch(&self, batch: &BatchJob) -> Result<(), DatabaseError>;

    /// Remove jobs pruned by the retention policy.
    async fn delete_jobs(&self, ids: &[Uuid]) -> Result<(), DatabaseError>;

    /// Remove a batch record (its children are deleted separately).
    async fn delete_batch(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// All jobs ordered by ledger sequence.
    async fn load_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    /// All batches ordered by ledger sequence.
    async fn load_batches(&self) -> Result<Vec<BatchJob>, DatabaseError>;
}
