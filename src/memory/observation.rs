//! Observation records kept in agent memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored fact or result, associated with a URL and/or a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    /// Position in the append log, starting at 1.
    pub seq: u64,
    /// URL the observation is about, normalized.
    pub subject_url: Option<String>,
    pub goal_or_topic: String,
    /// Opaque payload.
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Job that produced the observation, if any.
    pub source_job_id: Option<Uuid>,
}

/// An observation before the store assigns id, sequence and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObservation {
    #[serde(default, alias = "url")]
    pub subject_url: Option<String>,
    #[serde(alias = "goal", alias = "topic")]
    pub goal_or_topic: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub source_job_id: Option<Uuid>,
}

impl NewObservation {
    pub fn new(goal_or_topic: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            subject_url: None,
            goal_or_topic: goal_or_topic.into(),
            content,
            source_job_id: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.subject_url = Some(url.into());
        self
    }

    pub fn with_source_job(mut self, job_id: Uuid) -> Self {
        self.source_job_id = Some(job_id);
        self
    }
}

/// Selection criteria for memory queries. Empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationFilter {
    /// Exact (normalized) subject URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Subject URL host, ignoring a `www.` prefix.
    #[serde(default)]
    pub host: Option<String>,
    /// Free text; matches when any token is shared with the topic.
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ObservationFilter {
    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn by_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn by_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate figures about the memory store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub distinct_urls: usize,
    pub distinct_hosts: usize,
    pub distinct_topics: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_observation_accepts_short_field_names() {
        let parsed: NewObservation = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "goal": "find prices",
            "content": {"selector": ".price"}
        }))
        .unwrap();
        assert_eq!(parsed.subject_url.as_deref(), Some("https://example.com"));
        assert_eq!(parsed.goal_or_topic, "find prices");
        assert_eq!(parsed.content["selector"], ".price");
    }

    #[test]
    fn filter_builders() {
        let f = ObservationFilter::by_topic("prices").limit(3);
        assert_eq!(f.topic.as_deref(), Some("prices"));
        assert_eq!(f.limit, Some(3));
        assert!(f.url.is_none());
    }
}
