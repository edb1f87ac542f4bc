use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

const ENV_PREFIX: &str = "THERAPY_SCHEDULER_";

pub const DEFAULT_SEARCH_DAYS: u32 = 3;
pub const DEFAULT_SLOT_GRANULARITY_MINUTES: u32 = 30;
pub const DEFAULT_MAX_ALTERNATIVES: usize = 5;
pub const DEFAULT_RECOMMENDER_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_CACHE_CAPACITY: usize = 50_000;
const MAX_DEFAULT_WORKERS: usize = 8;

/// Relative weights of the compatibility factors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringWeights {
    pub service_match: f64,
    pub specialty_match: f64,
    pub caseload_headroom: f64,
    pub shared_availability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            service_match: 0.40,
            specialty_match: 0.20,
            caseload_headroom: 0.15,
            shared_availability: 0.25,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.service_match + self.specialty_match + self.caseload_headroom + self.shared_availability
    }
}

/// Blend used when ranking alternative slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlternativeWeights {
    pub compatibility: f64,
    pub proximity: f64,
}

impl Default for AlternativeWeights {
    fn default() -> Self {
        Self {
            compatibility: 0.3,
            proximity: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Zone used to resolve weekday and time-of-day from UTC timestamps.
    pub timezone: Tz,
    pub search_days: u32,
    pub slot_granularity_minutes: u32,
    pub max_alternatives: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommender_url: Option<String>,
    pub recommender_timeout_ms: u64,
    pub cache_capacity: usize,
    pub scoring_workers: usize,
    pub scoring_weights: ScoringWeights,
    pub alternative_weights: AlternativeWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            search_days: DEFAULT_SEARCH_DAYS,
            slot_granularity_minutes: DEFAULT_SLOT_GRANULARITY_MINUTES,
            max_alternatives: DEFAULT_MAX_ALTERNATIVES,
            recommender_url: None,
            recommender_timeout_ms: DEFAULT_RECOMMENDER_TIMEOUT_MS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            scoring_workers: default_workers(),
            scoring_weights: ScoringWeights::default(),
            alternative_weights: AlternativeWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset or unparsable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(raw) = read("TIMEZONE") {
            match Tz::from_str(&raw) {
                Ok(tz) => config.timezone = tz,
                Err(err) => warn!(target: "engine::config", value = %raw, error = %err, "ignoring invalid timezone"),
            }
        }
        if let Some(value) = parse_positive(read("SEARCH_DAYS"), "SEARCH_DAYS") {
            config.search_days = value;
        }
        if let Some(value) = parse_positive(read("SLOT_GRANULARITY_MINUTES"), "SLOT_GRANULARITY_MINUTES") {
            config.slot_granularity_minutes = value;
        }
        if let Some(value) = parse_positive(read("MAX_ALTERNATIVES"), "MAX_ALTERNATIVES") {
            config.max_alternatives = value;
        }
        if let Some(url) = read("RECOMMENDER_URL") {
            config.recommender_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(value) = parse_positive(read("RECOMMENDER_TIMEOUT_MS"), "RECOMMENDER_TIMEOUT_MS") {
            config.recommender_timeout_ms = value;
        }
        if let Some(value) = parse_positive(read("CACHE_CAPACITY"), "CACHE_CAPACITY") {
            config.cache_capacity = value;
        }
        if let Some(value) = parse_positive(read("SCORING_WORKERS"), "SCORING_WORKERS") {
            config.scoring_workers = value;
        }

        config
    }

    pub fn recommender_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.recommender_timeout_ms)
    }
}

fn parse_positive<T>(raw: Option<String>, name: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!(target: "engine::config", variable = name, value = %raw, "ignoring invalid setting");
            None
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}
