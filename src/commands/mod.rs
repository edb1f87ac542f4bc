pub mod schedule;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::services::alternative_suggester::AlternativeSuggester;
use crate::services::compatibility::CompatibilityScorer;
use crate::services::conflict_detector::ConflictDetector;
use crate::services::recommender::{AlternativeRecommender, RemoteRecommender};
use crate::services::schedule_optimizer::ScheduleOptimizer;
use crate::services::score_cache::ScoreCache;

pub use schedule::dispatch;

/// Shared engine handle for hosts. Cloning shares the score cache.
#[derive(Clone)]
pub struct EngineState {
    config: Arc<EngineConfig>,
    cache: Arc<ScoreCache>,
    recommender: Option<Arc<dyn AlternativeRecommender>>,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> AppResult<Self> {
        let recommender: Option<Arc<dyn AlternativeRecommender>> = match config.recommender_url.as_deref() {
            Some(url) => Some(Arc::new(RemoteRecommender::try_new(url, config.recommender_timeout())?)),
            None => None,
        };
        let cache = Arc::new(ScoreCache::new(config.cache_capacity));

        info!(
            target: "engine::command",
            timezone = %config.timezone,
            cache_capacity = config.cache_capacity,
            scoring_workers = config.scoring_workers,
            recommender = recommender.is_some(),
            "engine state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            recommender,
        })
    }

    pub fn from_env() -> AppResult<Self> {
        Self::new(EngineConfig::from_env())
    }

    pub fn with_recommender(mut self, recommender: Arc<dyn AlternativeRecommender>) -> Self {
        self.recommender = Some(recommender);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> Arc<ScoreCache> {
        Arc::clone(&self.cache)
    }

    pub fn detector(&self) -> ConflictDetector {
        ConflictDetector::new(self.config.timezone)
    }

    pub fn scorer(&self) -> CompatibilityScorer {
        CompatibilityScorer::new(Arc::clone(&self.cache), self.config.scoring_weights)
            .with_workers(self.config.scoring_workers)
    }

    pub fn suggester(&self) -> AlternativeSuggester {
        let suggester = AlternativeSuggester::new(&self.config, self.scorer());
        match &self.recommender {
            Some(recommender) => suggester.with_recommender(Arc::clone(recommender)),
            None => suggester,
        }
    }

    pub fn optimizer(&self) -> ScheduleOptimizer {
        ScheduleOptimizer::new(&self.config, self.scorer())
    }

    pub fn clear_cache(&self) -> CacheClearResult {
        CacheClearResult {
            entries_cleared: self.cache.clear(),
        }
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearResult {
    pub entries_cleared: usize,
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl CommandError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }

    pub fn unknown_operation(operation: &str) -> Self {
        warn!(target: "engine::command", %operation, "unknown operation requested");
        CommandError::new(
            "UNKNOWN_OPERATION",
            format!("unknown operation: {operation}"),
            Some(serde_json::json!({ "operation": operation })),
        )
    }
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Validation { message, details } => {
                CommandError::new("VALIDATION_ERROR", message, details)
            }
            AppError::Recommender { code, message } => CommandError::new(code.as_str(), message, None),
            AppError::Scoring { client_id, message } => CommandError::new(
                "SCORING_ERROR",
                message,
                Some(serde_json::json!({ "clientId": client_id })),
            ),
            AppError::Serialization(error) => {
                error!(target: "engine::command", error = %error, "serialization error in command");
                CommandError::new("UNKNOWN", "serialization failed", None)
            }
            AppError::Io(error) => {
                error!(target: "engine::command", error = %error, "io error in command");
                CommandError::new("UNKNOWN", "io failure", None)
            }
            AppError::Other(message) => {
                error!(target: "engine::command", %message, "unexpected error in command");
                CommandError::new("UNKNOWN", message, None)
            }
        }
    }
}
