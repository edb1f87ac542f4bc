use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::availability::WeeklyAvailability;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Therapist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub availability: WeeklyAvailability,
    #[serde(default, alias = "service_types")]
    pub service_types: Vec<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default, alias = "max_clients")]
    pub max_clients: u32,
    /// Caseload already carried outside this snapshot's sessions.
    #[serde(default, alias = "current_clients")]
    pub current_clients: u32,
    #[serde(default, alias = "min_weekly_hours")]
    pub min_weekly_hours: f64,
    /// Zero means uncapped.
    #[serde(default, alias = "max_weekly_hours")]
    pub max_weekly_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub availability: WeeklyAvailability,
    #[serde(default, alias = "service_preferences")]
    pub service_preferences: Vec<String>,
    #[serde(default, alias = "date_of_birth")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, alias = "authorized_units")]
    pub authorized_units: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
    #[serde(other)]
    Other,
}

impl SessionStatus {
    pub fn blocks_time(self) -> bool {
        !matches!(self, SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingSession {
    pub id: String,
    #[serde(alias = "therapist_id")]
    pub therapist_id: String,
    #[serde(alias = "client_id")]
    pub client_id: String,
    #[serde(alias = "start_time")]
    pub start_time: DateTime<Utc>,
    #[serde(alias = "end_time")]
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub status: SessionStatus,
}

impl ExistingSession {
    pub fn involves(&self, therapist_id: &str, client_id: &str) -> bool {
        self.therapist_id == therapist_id || self.client_id == client_id
    }

    pub fn minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TherapistUnavailable,
    ClientUnavailable,
    SessionOverlap,
}

impl ConflictType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictType::TherapistUnavailable => "therapist_unavailable",
            ConflictType::ClientUnavailable => "client_unavailable",
            ConflictType::SessionOverlap => "session_overlap",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ConflictType::TherapistUnavailable => "therapist unavailability",
            ConflictType::ClientUnavailable => "client unavailability",
            ConflictType::SessionOverlap => "session overlap",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub message: String,
    pub severity: ConflictSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alternative {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub score: f64,
    pub reason: String,
}

/// Descending score, then earliest start.
pub fn rank_alternatives(alternatives: &mut [Alternative]) {
    alternatives.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.start_time.cmp(&b.start_time))
    });
}
