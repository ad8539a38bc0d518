//! Composite-scored retrieval with result and token budgets.
//!
//! The retriever works entirely through the [`Store`] trait and the
//! [`Embedder`]; it has no database dependencies.
//!
//! # Algorithm
//!
//! 1. Queries shorter than `min_query_chars` return nothing.
//! 2. Embed the query. If the embedder is degraded, fall back to keyword
//!    matching over every chunk.
//! 3. Fetch `max_results × candidate_multiplier` nearest candidates.
//! 4. Drop candidates with `distance > distance_threshold`. Chunks stored
//!    without a vector join the pool through keyword matching, so a lite
//!    index, or a document indexed during an outage, stays reachable.
//! 5. Drop candidates under a noise path prefix.
//! 6. Score each survivor with the [`CompositeScorer`].
//! 7. Drop scores below `composite_threshold`.
//! 8. Sort by score (desc), then shorter text, then path and ordinal, and
//!    take a prefix until `max_results` or `max_token_budget` binds.
//! 9. Increment the access count of every returned chunk.
//!
//! Both thresholds are inclusive: a distance equal to the threshold
//! survives, as does a score equal to the composite threshold.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::chunk::{estimate_tokens, snippet};
use crate::config::{Config, ScoreWeights};
use crate::embedding::{Embedder, Embedding};
use crate::models::{ChunkRecord, ScoredResult};
use crate::store::{query_terms, ChunkKey, SqliteStore, Store};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub max_results: usize,
    pub distance_threshold: f64,
    pub composite_threshold: f64,
    pub max_token_budget: usize,
    pub min_query_chars: usize,
    pub noise_paths: Vec<String>,
    pub candidate_multiplier: usize,
    pub max_snippet_chars: usize,
}

impl From<&Config> for RetrievalParams {
    fn from(config: &Config) -> Self {
        let r = &config.retrieval;
        Self {
            max_results: r.max_results,
            distance_threshold: r.distance_threshold,
            composite_threshold: r.composite_threshold,
            max_token_budget: r.max_token_budget,
            min_query_chars: r.min_query_chars,
            noise_paths: r.noise_paths.clone(),
            candidate_multiplier: r.candidate_multiplier,
            max_snippet_chars: config.chunking.max_snippet_chars,
        }
    }
}

/// Inputs to a composite score, each in `[0, 1]` except `access_count`.
#[derive(Debug, Clone, Copy)]
pub struct Signals {
    /// `1 / (1 + distance)`, or the keyword match fraction.
    pub similarity: f64,
    pub confidence: f64,
    pub access_count: i64,
}

/// Combines relevance signals into one score in `[0, 1]`.
///
/// Implementations must be monotonically non-decreasing in each signal.
pub trait CompositeScorer: Send + Sync {
    fn score(&self, signals: &Signals) -> f64;
}

/// Normalized weighted sum:
/// `(ws·s + wc·c + wu·u) / (ws + wc + wu)` with
/// `u = access / (access + usage_saturation)`.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    weights: ScoreWeights,
}

impl WeightedScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl CompositeScorer for WeightedScorer {
    fn score(&self, signals: &Signals) -> f64 {
        let w = &self.weights;
        let total = w.similarity + w.confidence + w.usage;
        if total <= 0.0 {
            return 0.0;
        }
        let access = signals.access_count.max(0) as f64;
        let usage = access / (access + w.usage_saturation);
        let s = signals.similarity.clamp(0.0, 1.0);
        let c = signals.confidence.clamp(0.0, 1.0);
        (w.similarity * s + w.confidence * c + w.usage * usage) / total
    }
}

/// Similarity derived from an L2 distance.
pub fn distance_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Keyword similarity: 1.0 when the whole query occurs in the text,
/// otherwise the fraction of query terms that do.
pub fn keyword_similarity(query: &str, text: &str) -> f64 {
    let text = text.to_lowercase();
    let phrase = query.trim().to_lowercase();
    if !phrase.is_empty() && text.contains(&phrase) {
        return 1.0;
    }
    let terms = query_terms(query);
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

struct Candidate {
    record: ChunkRecord,
    distance: Option<f64>,
    similarity: f64,
}

/// Query-time half of the engine.
pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Embedder,
    params: RetrievalParams,
    scorer: Box<dyn CompositeScorer>,
}

impl Retriever {
    pub fn new(config: &Config, store: Arc<dyn Store>, embedder: Embedder) -> Self {
        Self {
            store,
            embedder,
            params: RetrievalParams::from(config),
            scorer: Box::new(WeightedScorer::new(config.retrieval.weights.clone())),
        }
    }

    pub fn with_params(mut self, params: RetrievalParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_scorer(mut self, scorer: impl CompositeScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Ranked, budget-limited results for `query`.
    ///
    /// # Errors
    ///
    /// Store failures and fatal embedding errors (bad credentials, wrong
    /// dimensions). A degraded provider is not an error.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredResult>> {
        let query = query.trim();
        if query.chars().count() < self.params.min_query_chars {
            debug!("query below {} chars; no retrieval", self.params.min_query_chars);
            return Ok(Vec::new());
        }

        let pool_size = self
            .params
            .max_results
            .saturating_mul(self.params.candidate_multiplier)
            .max(1);

        let mut candidates = match self.embedder.embed_query(query).await? {
            Embedding::Vector(v) => {
                let mut candidates: Vec<Candidate> = self
                    .store
                    .vector_search(&v, pool_size)
                    .await?
                    .into_iter()
                    .filter(|c| c.distance <= self.params.distance_threshold)
                    .map(|c| Candidate {
                        similarity: distance_similarity(c.distance),
                        distance: Some(c.distance),
                        record: c.record,
                    })
                    .collect();
                let lite = self
                    .store
                    .keyword_search_unembedded(query, pool_size)
                    .await?;
                if !lite.is_empty() {
                    debug!("{} vector-less chunks matched by keyword", lite.len());
                }
                candidates.extend(lite.into_iter().map(|record| Candidate {
                    similarity: keyword_similarity(query, &record.text),
                    distance: None,
                    record,
                }));
                candidates
            }
            Embedding::Degraded => self.keyword_candidates(query, pool_size).await?,
        };

        candidates.retain(|c| !self.is_noise(&c.record.path));

        let mut scored: Vec<(f64, Candidate)> = candidates
            .into_iter()
            .map(|c| {
                let score = self.scorer.score(&Signals {
                    similarity: c.similarity,
                    confidence: c.record.confidence,
                    access_count: c.record.access_count,
                });
                (score, c)
            })
            .filter(|(score, _)| *score >= self.params.composite_threshold)
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.text.chars().count().cmp(&b.record.text.chars().count()))
                .then_with(|| a.record.path.cmp(&b.record.path))
                .then_with(|| a.record.ordinal.cmp(&b.record.ordinal))
        });

        let mut results = Vec::new();
        let mut used_tokens = 0usize;
        for (score, c) in scored {
            if results.len() >= self.params.max_results {
                break;
            }
            let tokens = estimate_tokens(&c.record.text);
            if used_tokens + tokens > self.params.max_token_budget {
                break;
            }
            used_tokens += tokens;
            results.push(ScoredResult {
                snippet: snippet(&c.record.text, self.params.max_snippet_chars),
                path: c.record.path,
                title: c.record.title,
                ordinal: c.record.ordinal,
                heading: c.record.heading,
                text: c.record.text,
                content_type: c.record.content_type,
                distance: c.distance,
                composite_score: score,
                estimated_tokens: tokens,
            });
        }

        if !results.is_empty() {
            let keys: Vec<ChunkKey> = results
                .iter()
                .map(|r| (r.path.clone(), r.ordinal))
                .collect();
            self.store.record_access(&keys).await?;
        }

        debug!("retrieved {} results ({} tokens)", results.len(), used_tokens);
        Ok(results)
    }

    async fn keyword_candidates(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let records = self.store.keyword_search(query, limit).await?;
        Ok(records
            .into_iter()
            .map(|record| Candidate {
                similarity: keyword_similarity(query, &record.text),
                distance: None,
                record,
            })
            .collect())
    }

    fn is_noise(&self, path: &str) -> bool {
        self.params
            .noise_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

/// Run the search command: retrieve and print ranked results.
///
/// Output is JSON when `json` is set, otherwise a numbered listing.
pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let pool = store.pool().clone();
    let embedder = Embedder::resolve(&config.embedding).await?;

    let mut retriever = Retriever::new(config, Arc::new(store), embedder);
    if let Some(limit) = limit {
        let mut params = retriever.params().clone();
        params.max_results = limit;
        retriever = retriever.with_params(params);
    }
    let results = retriever.retrieve(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        pool.close().await;
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.composite_score,
            result.path,
            result.heading
        );
        println!("    title: {}", result.title);
        println!("    type: {}", result.content_type.as_str());
        if let Some(distance) = result.distance {
            println!("    distance: {:.3}", distance);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!();
    }

    pool.close().await;
    Ok(())
}
