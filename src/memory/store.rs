//! Append-only observation log with URL and host indexes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::memory::observation::{MemoryStats, NewObservation, Observation, ObservationFilter};
use crate::memory::text::{normalize_url, tokenize, url_host};
use crate::store::Database;

#[derive(Default)]
struct StoreInner {
    entries: Vec<Arc<Observation>>,
    by_url: HashMap<String, Vec<usize>>,
    by_host: HashMap<String, Vec<usize>>,
    topics: HashMap<String, usize>,
    next_seq: u64,
}

impl StoreInner {
    fn push(&mut self, observation: Observation) {
        let idx = self.entries.len();
        if let Some(ref url) = observation.subject_url {
            self.by_url.entry(url.clone()).or_default().push(idx);
            if let Some(host) = url_host(url) {
                self.by_host.entry(host).or_default().push(idx);
            }
        }
        *self
            .topics
            .entry(observation.goal_or_topic.trim().to_lowercase())
            .or_default() += 1;
        self.next_seq = self.next_seq.max(observation.seq + 1);
        self.entries.push(Arc::new(observation));
    }
}

/// Agent memory: observations in insertion order plus lookup indexes.
///
/// Appends are serialized so sequence numbers match log order; readers work
/// on a snapshot taken under a short read lock.
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    append_lock: Mutex<()>,
    db: Option<Arc<dyn Database>>,
}

impl MemoryStore {
    /// Create an in-memory store.
    pub fn new() -> Self {
        Self::with_db(None)
    }

    /// Create a store that writes every append through to `db`.
    pub fn with_db(db: Option<Arc<dyn Database>>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                next_seq: 1,
                ..StoreInner::default()
            }),
            append_lock: Mutex::new(()),
            db,
        }
    }

    /// Restore previously persisted observations (startup only).
    pub async fn load(&self, mut observations: Vec<Observation>) -> usize {
        observations.sort_by_key(|o| o.seq);
        let count = observations.len();
        let mut inner = self.inner.write().await;
        for observation in observations {
            inner.push(observation);
        }
        count
    }

    /// Reload everything the backend holds.
    pub async fn load_from_db(&self) -> Result<usize, MemoryError> {
        let Some(ref db) = self.db else {
            return Ok(0);
        };
        let observations = db.load_observations().await?;
        Ok(self.load(observations).await)
    }

    /// Validate, stamp and store an observation.
    pub async fn append(&self, new: NewObservation) -> Result<Observation, MemoryError> {
        let topic = new.goal_or_topic.trim();
        if topic.is_empty() {
            return Err(MemoryError::InvalidObservation(
                "goal_or_topic must not be empty".to_string(),
            ));
        }
        let subject_url = match new.subject_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(normalize_url(raw).ok_or_else(|| {
                MemoryError::InvalidObservation(format!("invalid subject url '{raw}'"))
            })?),
        };

        let _guard = self.append_lock.lock().await;
        let seq = self.inner.read().await.next_seq;
        let observation = Observation {
            id: Uuid::new_v4(),
            seq,
            subject_url,
            goal_or_topic: topic.to_string(),
            content: new.content,
            created_at: Utc::now(),
            source_job_id: new.source_job_id,
        };

        if let Some(ref db) = self.db {
            db.insert_observation(&observation).await?;
        }

        self.inner.write().await.push(observation.clone());
        debug!(
            observation_id = %observation.id,
            seq = observation.seq,
            url = ?observation.subject_url,
            "Observation appended"
        );
        Ok(observation)
    }

    /// Matching observations, most recent first.
    pub async fn query(&self, filter: &ObservationFilter) -> ObservationIter {
        let url = filter.url.as_deref().and_then(normalize_url);
        let host = filter
            .host
            .as_deref()
            .map(|h| h.trim().to_lowercase())
            .map(|h| h.strip_prefix("www.").map(str::to_string).unwrap_or(h));

        let inner = self.inner.read().await;
        let snapshot: Vec<Arc<Observation>> = match (&filter.url, &url, &host) {
            // A URL filter that does not parse cannot match anything.
            (Some(_), None, _) => Vec::new(),
            (_, Some(url), _) => Self::pick(&inner, inner.by_url.get(url)),
            (_, None, Some(host)) => Self::pick(&inner, inner.by_host.get(host)),
            _ => inner.entries.clone(),
        };
        drop(inner);

        ObservationIter {
            snapshot: snapshot.into_iter().rev(),
            host,
            topic: filter.topic.as_deref().map(tokenize),
            remaining: filter.limit.unwrap_or(usize::MAX),
        }
    }

    fn pick(inner: &StoreInner, indexes: Option<&Vec<usize>>) -> Vec<Arc<Observation>> {
        indexes
            .map(|idx| idx.iter().map(|&i| Arc::clone(&inner.entries[i])).collect())
            .unwrap_or_default()
    }

    /// Every observation in insertion order.
    pub async fn all(&self) -> Vec<Observation> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .map(|o| o.as_ref().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn stats(&self) -> MemoryStats {
        let inner = self.inner.read().await;
        MemoryStats {
            total: inner.entries.len(),
            distinct_urls: inner.by_url.len(),
            distinct_hosts: inner.by_host.len(),
            distinct_topics: inner.topics.len(),
            oldest: inner.entries.first().map(|o| o.created_at),
            newest: inner.entries.last().map(|o| o.created_at),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy, single-pass sequence of observations from a query snapshot.
pub struct ObservationIter {
    snapshot: std::iter::Rev<std::vec::IntoIter<Arc<Observation>>>,
    host: Option<String>,
    topic: Option<BTreeSet<String>>,
    remaining: usize,
}

impl ObservationIter {
    fn matches(&self, observation: &Observation) -> bool {
        if let Some(ref host) = self.host {
            let same_host = observation
                .subject_url
                .as_deref()
                .and_then(url_host)
                .is_some_and(|h| &h == host);
            if !same_host {
                return false;
            }
        }
        if let Some(ref wanted) = self.topic {
            let tokens = tokenize(&observation.goal_or_topic);
            if wanted.is_disjoint(&tokens) {
                return false;
            }
        }
        true
    }
}

impl Iterator for ObservationIter {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        if self.remaining == 0 {
            return None;
        }
        while let Some(candidate) = self.snapshot.next() {
            if self.matches(&candidate) {
                self.remaining -= 1;
                return Some(candidate.as_ref().clone());
            }
        }
        None
    }
}
