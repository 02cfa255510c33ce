//! Goal- and URL-aware ranking over stored observations.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RecommendConfig;
use crate::error::{Error, Result};
use crate::memory::observation::{Observation, ObservationFilter};
use crate::memory::store::MemoryStore;
use crate::memory::text::{jaccard, normalize_url, tokenize, url_host, url_tokens};

/// An observation together with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub observation: Observation,
    pub score: f64,
}

/// Ranks observations against a goal or URL query.
pub struct RecommendationEngine {
    memory: Arc<MemoryStore>,
    config: RecommendConfig,
}

impl RecommendationEngine {
    pub fn new(memory: Arc<MemoryStore>, config: RecommendConfig) -> Self {
        Self { memory, config }
    }

    /// Rank observations relevant to `query` using the current time.
    pub async fn recommend(&self, query: &str, top_k: Option<usize>) -> Result<Vec<Recommendation>> {
        self.recommend_at(query, top_k, Utc::now()).await
    }

    /// Rank observations as if the clock read `now`.
    ///
    /// URL-shaped queries consider everything recorded for the same host;
    /// other queries consider observations sharing at least one topic token.
    pub async fn recommend_at(
        &self,
        query: &str,
        top_k: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid("recommendation query must not be empty"));
        }
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        if top_k == 0 {
            return Err(Error::invalid("top_k must be at least 1"));
        }
        let top_k = top_k.min(self.config.max_top_k.max(1));

        let target = match normalize_url(query) {
            Some(url) => Target::Url {
                host: url_host(&url).unwrap_or_default(),
                tokens: url_tokens(&url),
                url,
            },
            None => Target::Topic {
                tokens: tokenize(query),
            },
        };

        let filter = match &target {
            Target::Url { host, .. } => ObservationFilter::by_host(host.clone()),
            Target::Topic { .. } => ObservationFilter::by_topic(query),
        };

        let mut ranked: Vec<Recommendation> = self
            .memory
            .query(&filter)
            .await
            .map(|observation| {
                let score = self.score(&target, &observation, now);
                Recommendation { observation, score }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.observation.created_at.cmp(&a.observation.created_at))
                .then_with(|| a.observation.seq.cmp(&b.observation.seq))
        });
        ranked.truncate(top_k);

        tracing::debug!(query = %query, results = ranked.len(), "Recommendations ranked");
        Ok(ranked)
    }

    fn score(&self, target: &Target, observation: &Observation, now: DateTime<Utc>) -> f64 {
        let cfg = &self.config;
        let topic_tokens = tokenize(&observation.goal_or_topic);

        let (exact, same_host, lexical) = match target {
            Target::Url { url, host, tokens } => {
                let subject = observation.subject_url.as_deref();
                let exact = subject == Some(url.as_str());
                let same_host = subject.and_then(url_host).is_some_and(|h| &h == host);
                (exact, same_host, jaccard(tokens, &topic_tokens))
            }
            Target::Topic { tokens } => (false, false, jaccard(tokens, &topic_tokens)),
        };

        let mut score = cfg.lexical_weight * lexical + cfg.recency_weight * self.decay(observation, now);
        if exact {
            score += cfg.url_match_weight;
        }
        if same_host {
            score += cfg.host_match_weight;
        }
        score
    }

    /// `2^(-age / half_life)`; future timestamps count as age zero.
    fn decay(&self, observation: &Observation, now: DateTime<Utc>) -> f64 {
        let half_life = self.config.half_life.as_secs_f64();
        if half_life <= 0.0 {
            return 0.0;
        }
        let age = (now - observation.created_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        (-age / half_life).exp2()
    }
}

enum Target {
    Url {
        url: String,
        host: String,
        tokens: std::collections::BTreeSet<String>,
    },
    Topic {
        tokens: std::collections::BTreeSet<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::observation::NewObservation;
    use chrono::Duration;

    async fn engine_with(entries: &[(Option<&str>, &str)]) -> (RecommendationEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for (url, topic) in entries {
            let mut new = NewObservation::new(*topic, serde_json::json!({"topic": topic}));
            if let Some(url) = url {
                new = new.with_url(*url);
            }
            store.append(new).await.unwrap();
        }
        (
            RecommendationEngine::new(Arc::clone(&store), RecommendConfig::default()),
            store,
        )
    }

    #[tokio::test]
    async fn exact_url_ranks_first_and_top_k_limits() {
        let (engine, _) = engine_with(&[
            (Some("https://example.com"), "landing page"),
            (Some("https://unrelated.org/page"), "gardening tips"),
        ])
        .await;

        let results = engine.recommend("https://example.com", Some(1)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].observation.subject_url.as_deref(),
            Some("https://example.com/")
        );
    }

    #[tokio::test]
    async fn exact_url_beats_same_host() {
        let (engine, _) = engine_with(&[
            (Some("https://shop.io/products"), "catalogue"),
            (Some("https://shop.io/about"), "company"),
        ])
        .await;

        let results = engine.recommend("https://shop.io/products", None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].observation.subject_url.as_deref(),
            Some("https://shop.io/products")
        );
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn topic_query_prefers_lexical_overlap() {
        let (engine, _) = engine_with(&[
            (None, "laptop prices"),
            (None, "laptop prices in europe"),
            (None, "weather forecast"),
        ])
        .await;

        let results = engine.recommend("Laptop prices", None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].observation.goal_or_topic, "laptop prices");
    }

    #[tokio::test]
    async fn topic_query_matches_non_latin_goals() {
        let (engine, store) = engine_with(&[(None, "価格 一覧"), (None, "weather forecast")]).await;

        let results = engine.recommend("価格 一覧", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].observation.goal_or_topic, "価格 一覧");

        let found: Vec<_> = store
            .query(&crate::memory::observation::ObservationFilter::by_topic("価格 一覧"))
            .await
            .collect();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn no_match_is_empty_not_error() {
        let (engine, _) = engine_with(&[(None, "weather forecast")]).await;
        assert!(engine.recommend("quantum chemistry", None).await.unwrap().is_empty());
        assert!(engine.recommend("https://nowhere.net", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_queries_rejected() {
        let (engine, _) = engine_with(&[]).await;
        assert!(matches!(
            engine.recommend("  ", None).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            engine.recommend("prices", Some(0)).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order_at_fixed_clock() {
        let (engine, store) = engine_with(&[(None, "same topic"), (None, "same topic")]).await;
        let all = store.all().await;
        let now = all[1].created_at + Duration::hours(1);
        let first = engine.recommend_at("same topic", None, now).await.unwrap();
        let second = engine.recommend_at("same topic", None, now).await.unwrap();
        let order: Vec<u64> = first.iter().map(|r| r.observation.seq).collect();
        assert_eq!(order, second.iter().map(|r| r.observation.seq).collect::<Vec<_>>());
        if all[0].created_at == all[1].created_at {
            assert_eq!(order, vec![1, 2]);
        } else {
            assert_eq!(order, vec![2, 1]);
        }
    }

    #[tokio::test]
    async fn recency_decays_with_half_life() {
        let (engine, store) = engine_with(&[(None, "prices")]).await;
        let obs = &store.all().await[0];
        let fresh = engine.decay(obs, obs.created_at);
        let day_old = engine.decay(obs, obs.created_at + Duration::hours(24));
        assert!((fresh - 1.0).abs() < 1e-9);
        assert!((day_old - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn top_k_is_clamped_to_max() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..4 {
            store
                .append(NewObservation::new(format!("prices {i}"), serde_json::json!(i)))
                .await
                .unwrap();
        }
        let engine = RecommendationEngine::new(
            store,
            RecommendConfig {
                max_top_k: 2,
                ..RecommendConfig::default()
            },
        );
        assert_eq!(engine.recommend("prices", Some(10)).await.unwrap().len(), 2);
    }
}
