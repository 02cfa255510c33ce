//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name for identification.
    pub name: String,
    /// Number of workers pulling from the job queue.
    pub worker_count: usize,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_base: Duration,
    /// Upper bound for a single retry delay.
    pub backoff_cap: Duration,
    /// Hard deadline for one execution attempt when the tool declares none.
    pub job_timeout: Duration,
    /// Maximum number of targets accepted in one batch.
    pub max_batch_size: usize,
    /// Maximum top-level history entries kept in the ledger (0 = unbounded).
    pub history_retention: usize,
    /// Tool that performs scrape jobs.
    pub scrape_tool: String,
    /// Whether successful tool-exec jobs with content are recorded in memory.
    pub record_tool_observations: bool,
    /// libSQL database file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Recommendation scoring.
    pub recommend: RecommendConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agentic-api".to_string(),
            worker_count: 4,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            job_timeout: Duration::from_secs(120),
            max_batch_size: 100,
            history_retention: 0,
            scrape_tool: "http".to_string(),
            record_tool_observations: true,
            db_path: None,
            recommend: RecommendConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from `AGENTIC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let rec = RecommendConfig::default();

        let worker_count = parse_or(&lookup, "AGENTIC_WORKERS", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENTIC_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let recommend = RecommendConfig {
            url_match_weight: parse_or(&lookup, "AGENTIC_REC_URL_WEIGHT", rec.url_match_weight)?,
            host_match_weight: parse_or(&lookup, "AGENTIC_REC_HOST_WEIGHT", rec.host_match_weight)?,
            lexical_weight: parse_or(&lookup, "AGENTIC_REC_LEXICAL_WEIGHT", rec.lexical_weight)?,
            recency_weight: parse_or(&lookup, "AGENTIC_REC_RECENCY_WEIGHT", rec.recency_weight)?,
            half_life: Duration::from_secs(
                parse_or(
                    &lookup,
                    "AGENTIC_REC_HALF_LIFE_HOURS",
                    rec.half_life.as_secs() / 3600,
                )? * 3600,
            ),
            default_top_k: parse_or(&lookup, "AGENTIC_REC_TOP_K", rec.default_top_k)?,
            max_top_k: parse_or(&lookup, "AGENTIC_REC_MAX_TOP_K", rec.max_top_k)?,
        };

        Ok(Self {
            name: lookup("AGENTIC_NAME").unwrap_or(defaults.name),
            worker_count,
            max_retries: parse_or(&lookup, "AGENTIC_MAX_RETRIES", defaults.max_retries)?,
            backoff_base: Duration::from_millis(parse_or(
                &lookup,
                "AGENTIC_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_cap: Duration::from_millis(parse_or(
                &lookup,
                "AGENTIC_BACKOFF_CAP_MS",
                defaults.backoff_cap.as_millis() as u64,
            )?),
            job_timeout: Duration::from_secs(parse_or(
                &lookup,
                "AGENTIC_JOB_TIMEOUT_SECS",
                defaults.job_timeout.as_secs(),
            )?),
            max_batch_size: parse_or(&lookup, "AGENTIC_MAX_BATCH", defaults.max_batch_size)?,
            history_retention: parse_or(
                &lookup,
                "AGENTIC_HISTORY_RETENTION",
                defaults.history_retention,
            )?,
            scrape_tool: lookup("AGENTIC_SCRAPE_TOOL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.scrape_tool),
            record_tool_observations: parse_or(
                &lookup,
                "AGENTIC_RECORD_TOOL_OBSERVATIONS",
                defaults.record_tool_observations,
            )?,
            db_path: lookup("AGENTIC_DB_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            recommend,
        })
    }

    /// Delay before re-queueing a job whose attempt number `attempt` (1-based) failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_cap)
    }
}

/// Weights and limits for recommendation scoring.
#[derive(Debug, Clone)]
pub struct RecommendConfig {
    /// Bonus for an observation recorded against the exact queried URL.
    pub url_match_weight: f64,
    /// Bonus for an observation recorded against the same host.
    pub host_match_weight: f64,
    /// Weight of token-set Jaccard overlap with the observation topic.
    pub lexical_weight: f64,
    /// Weight of the recency decay term.
    pub recency_weight: f64,
    /// Age at which the recency term has halved.
    pub half_life: Duration,
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            url_match_weight: 1.0,
            host_match_weight: 0.3,
            lexical_weight: 0.6,
            recency_weight: 0.2,
            half_life: Duration::from_secs(24 * 3600),
            default_top_k: 5,
            max_top_k: 50,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
