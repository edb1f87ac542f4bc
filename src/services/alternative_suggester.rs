use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{AlternativeWeights, EngineConfig};
use crate::error::{AppError, AppResult, RecommenderErrorCode};
use crate::models::scheduling::{rank_alternatives, Alternative, Client, Conflict, ConflictType, ExistingSession, Therapist};
use crate::services::compatibility::CompatibilityScorer;
use crate::services::conflict_detector::{validate_request, ConflictDetector, ProposedSession};
use crate::services::recommender::{AlternativeRecommender, RecommendationRequest};
use crate::services::schedule_utils;

const MINUTES_PER_DAY: i64 = 1_440;

/// Searches the days around a rejected request for conflict-free slots and
/// ranks them by closeness to the original time.
#[derive(Clone)]
pub struct AlternativeSuggester {
    detector: ConflictDetector,
    scorer: CompatibilityScorer,
    search_days: u32,
    slot_granularity_minutes: u32,
    max_alternatives: usize,
    weights: AlternativeWeights,
    recommender: Option<Arc<dyn AlternativeRecommender>>,
    recommender_timeout: StdDuration,
}

impl AlternativeSuggester {
    pub fn new(config: &EngineConfig, scorer: CompatibilityScorer) -> Self {
        Self {
            detector: ConflictDetector::new(config.timezone),
            scorer,
            search_days: config.search_days,
            slot_granularity_minutes: config.slot_granularity_minutes.max(1),
            max_alternatives: config.max_alternatives,
            weights: config.alternative_weights,
            recommender: None,
            recommender_timeout: config.recommender_timeout(),
        }
    }

    pub fn with_recommender(mut self, recommender: Arc<dyn AlternativeRecommender>) -> Self {
        self.recommender = Some(recommender);
        self
    }

    /// Ranked alternatives for a request. Recommender failures degrade to an
    /// empty list; only invalid requests are errors.
    pub async fn suggest(
        &self,
        proposal: &ProposedSession,
        existing_sessions: &[ExistingSession],
        therapist: &Therapist,
        client: &Client,
        conflicts: &[Conflict],
    ) -> AppResult<Vec<Alternative>> {
        let local = self.local_candidates(proposal, existing_sessions, therapist, client, conflicts)?;
        if conflicts.is_empty() {
            return Ok(local);
        }

        let Some(recommender) = self.recommender.as_ref() else {
            return Ok(local);
        };

        let request = RecommendationRequest {
            start_time: proposal.start_time,
            end_time: proposal.end_time,
            therapist_id: proposal.therapist_id.clone(),
            client_id: proposal.client_id.clone(),
            conflicts: conflicts.to_vec(),
            candidates: local,
            max_alternatives: self.max_alternatives,
        };

        let outcome = match timeout(self.recommender_timeout, recommender.recommend(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::recommender(
                RecommenderErrorCode::Timeout,
                format!(
                    "recommender did not answer within {} ms",
                    self.recommender_timeout.as_millis()
                ),
            )),
        };

        match outcome {
            Ok(alternatives) => Ok(self.revalidate(alternatives, proposal, existing_sessions, therapist, client)),
            Err(err) => {
                warn!(
                    target: "engine::suggest",
                    therapist_id = %proposal.therapist_id,
                    client_id = %proposal.client_id,
                    code = err.recommender_code().map(|code| code.as_str()).unwrap_or("UNKNOWN"),
                    error = %err,
                    "recommender failed; returning no alternatives"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Neighborhood search without delegation.
    pub fn local_candidates(
        &self,
        proposal: &ProposedSession,
        existing_sessions: &[ExistingSession],
        therapist: &Therapist,
        client: &Client,
        conflicts: &[Conflict],
    ) -> AppResult<Vec<Alternative>> {
        validate_request(proposal, therapist, client)?;
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }

        let tz = self.detector.timezone();
        let duration = proposal.minutes();
        let origin_date = schedule_utils::local_slot(proposal.start_time, proposal.end_time, tz).date;
        let compatibility = self.scorer.score(therapist, client)?;
        let resolved = resolved_label(conflicts);
        let search_days = i64::from(self.search_days);

        let mut alternatives = Vec::new();
        for offset in -search_days..=search_days {
            let Some(date) = origin_date.checked_add_signed(Duration::days(offset)) else {
                continue;
            };
            let Some(window) = therapist
                .availability
                .shared_window(date.weekday(), &client.availability)
            else {
                continue;
            };

            for start in schedule_utils::slot_starts(
                window.start,
                window.end,
                duration,
                i64::from(self.slot_granularity_minutes),
            ) {
                let Some(start_time) = schedule_utils::at_local(date, start, tz) else {
                    continue;
                };
                if start_time == proposal.start_time {
                    continue;
                }
                let end_time = start_time + Duration::minutes(duration);
                let candidate = retimed(proposal, start_time, end_time);
                if !self
                    .detector
                    .collect(&candidate, existing_sessions, therapist, client)
                    .is_empty()
                {
                    continue;
                }

                let delta = (start_time - proposal.start_time).num_minutes();
                alternatives.push(Alternative {
                    start_time,
                    end_time,
                    score: self.blend(compatibility, self.proximity(delta)),
                    reason: format!("{resolved}; {}", relation(origin_date, date, delta, start)),
                });
            }
        }

        rank_alternatives(&mut alternatives);
        alternatives.truncate(self.max_alternatives);

        debug!(
            target: "engine::suggest",
            therapist_id = %proposal.therapist_id,
            client_id = %proposal.client_id,
            found = alternatives.len(),
            "local alternatives ranked"
        );

        Ok(alternatives)
    }

    fn proximity(&self, delta_minutes: i64) -> f64 {
        let span = (i64::from(self.search_days) * MINUTES_PER_DAY + MINUTES_PER_DAY) as f64;
        (1.0 - delta_minutes.abs() as f64 / span).clamp(0.0, 1.0)
    }

    fn blend(&self, compatibility: f64, proximity: f64) -> f64 {
        (self.weights.compatibility * compatibility + self.weights.proximity * proximity).clamp(0.0, 1.0)
    }

    fn revalidate(
        &self,
        alternatives: Vec<Alternative>,
        proposal: &ProposedSession,
        existing_sessions: &[ExistingSession],
        therapist: &Therapist,
        client: &Client,
    ) -> Vec<Alternative> {
        let returned = alternatives.len();
        let mut seen = HashSet::new();
        let mut accepted: Vec<Alternative> = alternatives
            .into_iter()
            .filter(|alt| alt.end_time > alt.start_time && alt.start_time != proposal.start_time)
            .filter(|alt| seen.insert((alt.start_time, alt.end_time)))
            .filter(|alt| {
                let candidate = retimed(proposal, alt.start_time, alt.end_time);
                self.detector
                    .collect(&candidate, existing_sessions, therapist, client)
                    .is_empty()
            })
            .map(|mut alt| {
                alt.score = if alt.score.is_finite() { alt.score.clamp(0.0, 1.0) } else { 0.0 };
                alt
            })
            .collect();

        rank_alternatives(&mut accepted);
        accepted.truncate(self.max_alternatives);

        if accepted.len() < returned {
            debug!(
                target: "engine::suggest",
                returned,
                accepted = accepted.len(),
                "dropped recommender alternatives that failed revalidation"
            );
        }
        accepted
    }
}

fn retimed(proposal: &ProposedSession, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> ProposedSession {
    ProposedSession {
        start_time,
        end_time,
        ..proposal.clone()
    }
}

fn resolved_label(conflicts: &[Conflict]) -> String {
    let mut kinds: Vec<ConflictType> = Vec::new();
    for conflict in conflicts {
        if !kinds.contains(&conflict.conflict_type) {
            kinds.push(conflict.conflict_type);
        }
    }
    let described: Vec<&str> = kinds.iter().map(|kind| kind.describe()).collect();
    format!("Resolves {}", described.join(" and "))
}

fn relation(origin: NaiveDate, date: NaiveDate, delta_minutes: i64, start: NaiveTime) -> String {
    let days = (date - origin).num_days();
    if days == 0 {
        let direction = if delta_minutes < 0 { "earlier" } else { "later" };
        return format!("same day, {} {direction}", span_label(delta_minutes.abs()));
    }
    let direction = if days < 0 { "earlier" } else { "later" };
    let count = days.abs();
    format!(
        "{count} day{} {direction} at {}",
        if count == 1 { "" } else { "s" },
        start.format("%H:%M")
    )
}

fn span_label(minutes: i64) -> String {
    if minutes >= 60 && minutes % 60 == 0 {
        let hours = minutes / 60;
        format!("{hours} hour{}", if hours == 1 { "" } else { "s" })
    } else {
        format!("{minutes} minutes")
    }
}
