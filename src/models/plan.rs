use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HORIZON_DAYS: u32 = 7;
pub const DEFAULT_SESSION_MINUTES: u32 = 60;
pub const DEFAULT_MINUTES_PER_UNIT: u32 = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConstraints {
    /// First instant a batch session may start.
    pub horizon_start: DateTime<Utc>,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    #[serde(default = "default_session_minutes")]
    pub session_minutes: u32,
    /// Falls back to the engine's configured granularity.
    #[serde(default)]
    pub slot_granularity_minutes: Option<u32>,
    #[serde(default = "default_minutes_per_unit")]
    pub minutes_per_unit: u32,
}

impl ScheduleConstraints {
    pub fn starting_at(horizon_start: DateTime<Utc>) -> Self {
        Self {
            horizon_start,
            horizon_days: DEFAULT_HORIZON_DAYS,
            session_minutes: DEFAULT_SESSION_MINUTES,
            slot_granularity_minutes: None,
            minutes_per_unit: DEFAULT_MINUTES_PER_UNIT,
        }
    }
}

fn default_horizon_days() -> u32 {
    DEFAULT_HORIZON_DAYS
}

fn default_session_minutes() -> u32 {
    DEFAULT_SESSION_MINUTES
}

fn default_minutes_per_unit() -> u32 {
    DEFAULT_MINUTES_PER_UNIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub client_id: String,
    pub therapist_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Compatibility weighted by how early in the horizon the slot falls.
    pub score: f64,
    pub compatibility: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedClient {
    pub client_id: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub clients_considered: usize,
    pub pairs_scored: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPlan {
    pub id: String,
    pub assignments: Vec<Assignment>,
    pub unassigned: Vec<UnassignedClient>,
    pub cancelled: bool,
    #[serde(default)]
    pub unprocessed_client_ids: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub stats: PlanStats,
}

impl AssignmentPlan {
    pub fn assignment_for(&self, client_id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.client_id == client_id)
    }

    pub fn unassigned_for(&self, client_id: &str) -> Option<&UnassignedClient> {
        self.unassigned.iter().find(|u| u.client_id == client_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BatchPhase {
    Pending,
    Scoring,
    Assigning,
    Done,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchPhase::Pending => "pending",
            BatchPhase::Scoring => "scoring",
            BatchPhase::Assigning => "assigning",
            BatchPhase::Done => "done",
        };
        f.write_str(label)
    }
}
