use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, RecommenderErrorCode};
use crate::models::scheduling::{Alternative, Conflict};

const SUGGEST_PATH: &str = "/rpc/suggest_alternative_times";
const CORRELATION_HEADER: &str = "x-correlation-id";

/// What the engine hands to an external recommender: the rejected request, the
/// reasons it was rejected and the locally ranked conflict-free candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub therapist_id: String,
    pub client_id: String,
    pub conflicts: Vec<Conflict>,
    pub candidates: Vec<Alternative>,
    pub max_alternatives: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendationResponse {
    pub alternatives: Vec<Alternative>,
}

/// Source of alternative times beyond the local neighborhood search.
#[async_trait::async_trait]
pub trait AlternativeRecommender: Send + Sync {
    async fn recommend(&self, request: &RecommendationRequest) -> AppResult<Vec<Alternative>>;
}

/// JSON-over-HTTP recommender.
pub struct RemoteRecommender {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteRecommender {
    pub fn try_new(base_url: &str, timeout: StdDuration) -> AppResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(AppError::validation("recommender url must not be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Some(StdDuration::from_secs(90)))
            .build()
            .map_err(|err| AppError::other(format!("failed to build recommender http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}{SUGGEST_PATH}"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl AlternativeRecommender for RemoteRecommender {
    async fn recommend(&self, request: &RecommendationRequest) -> AppResult<Vec<Alternative>> {
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        debug!(
            target: "engine::suggest",
            correlation_id = %correlation_id,
            endpoint = %self.endpoint,
            candidates = request.candidates.len(),
            "calling recommender"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(CORRELATION_HEADER, &correlation_id)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!(
                target: "engine::suggest",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                body = %snippet,
                "recommender returned error status"
            );
            return Err(AppError::recommender(
                RecommenderErrorCode::HttpStatus,
                format!("recommender responded with {status}"),
            ));
        }

        let bytes = response.bytes().await?;
        let parsed: RecommendationResponse = serde_json::from_slice(&bytes).map_err(|err| {
            AppError::recommender(
                RecommenderErrorCode::InvalidResponse,
                format!("could not decode recommender response: {err}"),
            )
        })?;

        debug!(
            target: "engine::suggest",
            correlation_id = %correlation_id,
            latency_ms = started.elapsed().as_millis() as u64,
            returned = parsed.alternatives.len(),
            "recommender responded"
        );

        Ok(parsed.alternatives)
    }
}
