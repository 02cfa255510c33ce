//! Engine: the owning context that wires every component together.
//!
//! Initialization order:
//! 1. the tool registry is frozen behind an `Arc` and the scrape tool checked;
//! 2. the memory store is created and reloaded from the backend;
//! 3. the job ledger is created and reloaded (interrupted jobs are cancelled);
//! 4. the recommendation engine is built over the memory store;
//! 5. the scheduler spawns its workers;
//! 6. the status reporter attaches to the ledger and the event channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{ConfigError, Result};
use crate::jobs::{
    HistoryFilter, JobEvent, JobLedger, JobStatus, LedgerEntry, LedgerSummary, Scheduler,
    ScrapeTarget, StatusReporter,
};
use crate::memory::{
    MemoryStats, MemoryStore, NewObservation, Observation, ObservationFilter, Recommendation,
    RecommendationEngine,
};
use crate::store::Database;
use crate::tools::{ToolDescriptor, ToolRegistry};

/// Answer to a single job submission.
#[derive(Debug, Clone, Serialize)]
pub struct JobReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Answer to a batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    pub child_job_ids: Vec<Uuid>,
    pub status: JobStatus,
}

/// Overall agent status.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub version: &'static str,
    pub workers: usize,
    pub tools: usize,
    pub jobs: LedgerSummary,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub struct Engine {
    config: AgentConfig,
    tools: Arc<ToolRegistry>,
    memory: Arc<MemoryStore>,
    recommender: RecommendationEngine,
    scheduler: Scheduler,
    reporter: StatusReporter,
}

impl Engine {
    /// Build every component and start the workers.
    pub async fn start(
        config: AgentConfig,
        tools: ToolRegistry,
        db: Option<Arc<dyn Database>>,
    ) -> Result<Self> {
        if !tools.has(&config.scrape_tool) {
            return Err(ConfigError::InvalidValue {
                key: "AGENTIC_SCRAPE_TOOL".to_string(),
                message: format!("tool '{}' is not registered", config.scrape_tool),
            }
            .into());
        }
        let tools = Arc::new(tools);

        let memory = Arc::new(MemoryStore::with_db(db.clone()));
        let observations = memory.load_from_db().await?;

        let ledger = Arc::new(JobLedger::new(db.clone(), config.history_retention));
        let entries = ledger.load_from_db().await?;

        let recommender = RecommendationEngine::new(Arc::clone(&memory), config.recommend.clone());
        let scheduler = Scheduler::start(
            config.clone(),
            Arc::clone(&tools),
            Arc::clone(&ledger),
            Arc::clone(&memory),
        );
        let reporter = StatusReporter::new(ledger, scheduler.events());

        info!(
            name = %config.name,
            tools = tools.count(),
            observations,
            ledger_entries = entries,
            persistent = db.is_some(),
            "Engine started"
        );

        Ok(Self {
            config,
            tools,
            memory,
            recommender,
            scheduler,
            reporter,
        })
    }

    // ── Jobs ────────────────────────────────────────────────────────

    pub async fn scrape(&self, url: &str, goal: &str) -> Result<JobReceipt> {
        let job = self.scheduler.submit_scrape(url, goal).await?;
        Ok(JobReceipt {
            job_id: job.id,
            status: job.status,
        })
    }

    pub async fn batch_scrape(&self, targets: Vec<ScrapeTarget>) -> Result<BatchReceipt> {
        let batch = self.scheduler.submit_batch(targets).await?;
        Ok(BatchReceipt {
            batch_id: batch.id,
            child_job_ids: batch.child_ids(),
            status: batch.status,
        })
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.list()
    }

    pub async fn execute_tool(&self, name: &str, input: serde_json::Value) -> Result<JobReceipt> {
        let job = self.scheduler.execute_tool(name, input).await?;
        Ok(JobReceipt {
            job_id: job.id,
            status: job.status,
        })
    }

    pub async fn cancel(&self, id: Uuid) -> Result<LedgerEntry> {
        self.scheduler.cancel(id).await
    }

    pub async fn status(&self, id: Uuid) -> Result<LedgerEntry> {
        Ok(self.reporter.get_status(id).await?)
    }

    pub async fn history(&self, filter: HistoryFilter) -> Vec<LedgerEntry> {
        self.reporter.list_history(filter).await.collect()
    }

    /// Wait until a job or batch finishes.
    pub async fn wait_for_terminal(&self, id: Uuid, timeout: Duration) -> Result<LedgerEntry> {
        Ok(self.reporter.wait_for_terminal(id, timeout).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    // ── Memory ──────────────────────────────────────────────────────

    pub async fn memory(&self, filter: &ObservationFilter) -> Vec<Observation> {
        self.memory.query(filter).await.collect()
    }

    pub async fn post_memory(&self, observation: NewObservation) -> Result<Observation> {
        Ok(self.memory.append(observation).await?)
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.memory.stats().await
    }

    pub async fn recommendations(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<Recommendation>> {
        self.recommender.recommend(query, top_k).await
    }

    // ── Agent ───────────────────────────────────────────────────────

    pub async fn agent_status(&self) -> AgentStatus {
        AgentStatus {
            name: self.config.name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            workers: self.config.worker_count,
            tools: self.tools.count(),
            jobs: self.reporter.summary().await,
            memory: self.memory.stats().await,
        }
    }

    pub fn health(&self) -> Health {
        Health {
            status: if self.scheduler.is_shut_down() {
                "stopping"
            } else {
                "ok"
            },
            timestamp: Utc::now(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Stop the workers. Unfinished jobs end Cancelled.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
