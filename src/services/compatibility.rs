use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::config::ScoringWeights;
use crate::error::{AppError, AppResult};
use crate::models::scheduling::{Client, Therapist};
use crate::services::score_cache::{ScoreCache, ScoreCacheKey, ScoreFunction};

/// Pairs per worker below which scoring stays on the calling thread.
const PARALLEL_THRESHOLD: usize = 64;

/// Underlying, uncached compatibility computation.
pub trait PairScorer: Send + Sync {
    fn compute(&self, therapist: &Therapist, client: &Client) -> AppResult<f64>;
}

/// Weighted blend of service match, specialty match, caseload headroom and
/// shared weekly availability.
#[derive(Debug, Clone, Default)]
pub struct WeightedPairScorer {
    weights: ScoringWeights,
}

impl WeightedPairScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn breakdown(&self, therapist: &Therapist, client: &Client) -> ScoreBreakdown {
        let preferences = normalized(&client.service_preferences);
        let services = normalized(&therapist.service_types);
        let specialties = normalized(&therapist.specialties);

        let service_match = ratio(
            preferences.intersection(&services).count() as f64,
            preferences.len() as f64,
        );
        let specialty_match = ratio(
            preferences.intersection(&specialties).count() as f64,
            preferences.len() as f64,
        );
        let caseload_headroom = if therapist.max_clients == 0 {
            0.0
        } else {
            (1.0 - therapist.current_clients as f64 / therapist.max_clients as f64).clamp(0.0, 1.0)
        };
        let shared_availability = ratio(
            therapist.availability.shared_minutes(&client.availability) as f64,
            client.availability.total_minutes() as f64,
        )
        .min(1.0);

        ScoreBreakdown {
            service_match,
            specialty_match,
            caseload_headroom,
            shared_availability,
        }
    }
}

impl PairScorer for WeightedPairScorer {
    fn compute(&self, therapist: &Therapist, client: &Client) -> AppResult<f64> {
        let parts = self.breakdown(therapist, client);
        let weights = &self.weights;
        let weighted = weights.service_match * parts.service_match
            + weights.specialty_match * parts.specialty_match
            + weights.caseload_headroom * parts.caseload_headroom
            + weights.shared_availability * parts.shared_availability;
        Ok(ratio(weighted, weights.total()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub service_match: f64,
    pub specialty_match: f64,
    pub caseload_headroom: f64,
    pub shared_availability: f64,
}

/// Cache-backed compatibility scoring keyed by `(therapist.id, client.id)`.
#[derive(Clone)]
pub struct CompatibilityScorer {
    cache: Arc<ScoreCache>,
    pair_scorer: Arc<dyn PairScorer>,
    workers: usize,
}

impl CompatibilityScorer {
    pub fn new(cache: Arc<ScoreCache>, weights: ScoringWeights) -> Self {
        Self::with_pair_scorer(cache, Arc::new(WeightedPairScorer::new(weights)))
    }

    pub fn with_pair_scorer(cache: Arc<ScoreCache>, pair_scorer: Arc<dyn PairScorer>) -> Self {
        Self {
            cache,
            pair_scorer,
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<ScoreCache> {
        &self.cache
    }

    pub fn score(&self, therapist: &Therapist, client: &Client) -> AppResult<f64> {
        let key = ScoreCacheKey::compatibility(&therapist.id, &client.id);
        self.cache.get_or_try_insert_with(&key, || {
            let value = self.pair_scorer.compute(therapist, client)?;
            if !value.is_finite() {
                return Err(AppError::scoring(
                    client.id.clone(),
                    format!("non-finite compatibility against therapist {}", therapist.id),
                ));
            }
            Ok(value.clamp(0.0, 1.0))
        })
    }

    /// Weekly minutes both parties are open, memoized like scores.
    pub fn shared_minutes(&self, therapist: &Therapist, client: &Client) -> i64 {
        let key = ScoreCacheKey::new(ScoreFunction::SharedAvailability, &therapist.id, &client.id);
        let minutes = self
            .cache
            .get_or_try_insert_with(&key, || {
                Ok::<_, AppError>(therapist.availability.shared_minutes(&client.availability) as f64)
            })
            .unwrap_or(0.0);
        minutes as i64
    }

    /// Scores pairs across scoped worker threads; results keep input order.
    /// A panicking worker turns its whole chunk into scoring errors.
    pub fn score_many(&self, pairs: &[(&Therapist, &Client)]) -> Vec<AppResult<f64>> {
        let workers = self.workers.min(pairs.len().div_ceil(PARALLEL_THRESHOLD)).max(1);
        if workers == 1 {
            return pairs.iter().map(|(t, c)| self.score(t, c)).collect();
        }

        let chunk_size = pairs.len().div_ceil(workers);
        debug!(target: "engine::scoring", pairs = pairs.len(), workers, "parallel scoring");

        thread::scope(|scope| {
            let handles: Vec<_> = pairs
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(t, c)| self.score(t, c))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(chunk, handle)| match handle.join() {
                    Ok(results) => results,
                    Err(_) => {
                        warn!(target: "engine::scoring", size = chunk.len(), "scoring worker panicked");
                        chunk
                            .iter()
                            .map(|(_, c)| {
                                Err(AppError::scoring(c.id.clone(), "scoring worker panicked"))
                            })
                            .collect()
                    }
                })
                .collect()
        })
    }
}

fn normalized(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
