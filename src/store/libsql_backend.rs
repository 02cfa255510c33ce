//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::job::{BatchJob, Job};
use crate::memory::observation::Observation;
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Map a libsql Row to an Observation.
///
/// Column order: 0:id, 1:seq, 2:subject_url, 3:goal_or_topic, 4:content,
/// 5:created_at, 6:source_job_id
fn row_to_observation(row: &libsql::Row) -> Result<Observation, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("observation id: {e}")))?;
    let seq: i64 = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("observation seq: {e}")))?;
    let subject_url: Option<String> = row.get(2).ok();
    let goal_or_topic: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("observation topic: {e}")))?;
    let content_str: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("observation content: {e}")))?;
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("observation created_at: {e}")))?;
    let source_str: Option<String> = row.get(6).ok();

    Ok(Observation {
        id: id_str
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("observation id: {e}")))?,
        seq: seq.max(0) as u64,
        subject_url,
        goal_or_topic,
        content: serde_json::from_str(&content_str)
            .map_err(|e| DatabaseError::Serialization(format!("observation content: {e}")))?,
        created_at: parse_datetime(&created_str),
        source_job_id: source_str.and_then(|s| s.parse().ok()),
    })
}

fn row_to_batch(row: &libsql::Row) -> Result<BatchJob, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("batch id: {e}")))?;
    let seq: i64 = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("batch seq: {e}")))?;
    let created_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("batch created_at: {e}")))?;
    let children_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("batch children: {e}")))?;

    Ok(BatchJob {
        id: id_str
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("batch id: {e}")))?,
        seq: seq.max(0) as u64,
        children: serde_json::from_str(&children_str)
            .map_err(|e| DatabaseError::Serialization(format!("batch children: {e}")))?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Observations ────────────────────────────────────────────────

    async fn insert_observation(&self, observation: &Observation) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO observations (id, seq, subject_url, goal_or_topic, content, created_at, source_job_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    observation.id.to_string(),
                    observation.seq as i64,
                    opt_text_owned(observation.subject_url.clone()),
                    observation.goal_or_topic.clone(),
                    to_json(&observation.content)?,
                    observation.created_at.to_rfc3339(),
                    opt_text_owned(observation.source_job_id.map(|id| id.to_string())),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_observation: {e}")))?;

        debug!(observation_id = %observation.id, seq = observation.seq, "Observation inserted into DB");
        Ok(())
    }

    async fn load_observations(&self) -> Result<Vec<Observation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, seq, subject_url, goal_or_topic, content, created_at, source_job_id FROM observations ORDER BY seq",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_observations: {e}")))?;

        let mut observations = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_observation(&row) {
                Ok(observation) => observations.push(observation),
                Err(e) => warn!("Skipping observation row: {e}"),
            }
        }
        Ok(observations)
    }

    // ── Job ledger ──────────────────────────────────────────────────

    async fn upsert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO jobs (id, seq, kind, batch_id, status, created_at, updated_at, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (id) DO UPDATE SET status = ?5, updated_at = ?7, data = ?8",
                params![
                    job.id.to_string(),
                    job.seq as i64,
                    job.kind.as_str(),
                    opt_text_owned(job.batch_id.map(|id| id.to_string())),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    to_json(job)?,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_job: {e}")))?;

        debug!(job_id = %job.id, status = %job.status, "Job persisted");
        Ok(())
    }

    async fn upsert_batch(&self, batch: &BatchJob) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO batches (id, seq, created_at, children) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO UPDATE SET children = ?4",
                params![
                    batch.id.to_string(),
                    batch.seq as i64,
                    batch.created_at.to_rfc3339(),
                    to_json(&batch.children)?,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_batch: {e}")))?;
        Ok(())
    }

    async fn delete_jobs(&self, ids: &[Uuid]) -> Result<(), DatabaseError> {
        for id in ids {
            self.conn()
                .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_jobs: {e}")))?;
        }
        Ok(())
    }

    async fn delete_batch(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM batches WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_batch: {e}")))?;
        Ok(())
    }

    async fn load_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT data FROM jobs ORDER BY seq", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let data: String = match row.get(0) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Skipping job row: {e}");
                    continue;
                }
            };
            match serde_json::from_str::<Job>(&data) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping job row: {e}"),
            }
        }
        Ok(jobs)
    }

    async fn load_batches(&self) -> Result<Vec<BatchJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, seq, created_at, children FROM batches ORDER BY seq", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_batches: {e}")))?;

        let mut batches = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_batch(&row) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!("Skipping batch row: {e}"),
            }
        }
        Ok(batches)
    }
}
