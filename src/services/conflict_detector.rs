use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::availability::{is_within_availability, WeeklyAvailability};
use crate::models::scheduling::{
    Client, Conflict, ConflictSeverity, ConflictType, ExistingSession, Therapist,
};
use crate::services::schedule_utils::{self, LocalSlot};

/// A session being proposed, or an existing one being edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProposedSession {
    #[serde(alias = "start_time")]
    pub start_time: DateTime<Utc>,
    #[serde(alias = "end_time")]
    pub end_time: DateTime<Utc>,
    #[serde(alias = "therapist_id")]
    pub therapist_id: String,
    #[serde(alias = "client_id")]
    pub client_id: String,
    /// Session being edited; it never conflicts with itself.
    #[serde(default, alias = "exclude_session_id")]
    pub exclude_session_id: Option<String>,
}

impl ProposedSession {
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        therapist_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            therapist_id: therapist_id.into(),
            client_id: client_id.into(),
            exclude_session_id: None,
        }
    }

    pub fn excluding(mut self, session_id: impl Into<String>) -> Self {
        self.exclude_session_id = Some(session_id.into());
        self
    }

    pub fn minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    timezone: Tz,
}

impl ConflictDetector {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Validates the request, then reports every applicable conflict in the
    /// order therapist, client, overlap.
    pub fn detect(
        &self,
        proposal: &ProposedSession,
        existing_sessions: &[ExistingSession],
        therapist: &Therapist,
        client: &Client,
    ) -> AppResult<Vec<Conflict>> {
        validate_request(proposal, therapist, client)?;
        let conflicts = self.collect(proposal, existing_sessions, therapist, client);

        debug!(
            target: "engine::conflict",
            therapist_id = %proposal.therapist_id,
            client_id = %proposal.client_id,
            start = %proposal.start_time,
            conflicts = conflicts.len(),
            "conflict check complete"
        );

        Ok(conflicts)
    }

    /// Conflict collection without request validation; callers must have
    /// validated ids and interval already.
    pub fn collect(
        &self,
        proposal: &ProposedSession,
        existing_sessions: &[ExistingSession],
        therapist: &Therapist,
        client: &Client,
    ) -> Vec<Conflict> {
        let slot = schedule_utils::local_slot(proposal.start_time, proposal.end_time, self.timezone);
        let mut conflicts = Vec::new();

        if !fits(&therapist.availability, &slot) {
            conflicts.push(Conflict {
                conflict_type: ConflictType::TherapistUnavailable,
                message: unavailable_message("Therapist", &therapist.name, &slot),
                severity: ConflictSeverity::Medium,
                related_session_id: None,
            });
        }

        if !fits(&client.availability, &slot) {
            conflicts.push(Conflict {
                conflict_type: ConflictType::ClientUnavailable,
                message: unavailable_message("Client", &client.name, &slot),
                severity: ConflictSeverity::Medium,
                related_session_id: None,
            });
        }

        let mut colliding = existing_sessions.iter().filter(|session| {
            session.status.blocks_time()
                && session.involves(&proposal.therapist_id, &proposal.client_id)
                && proposal.exclude_session_id.as_deref() != Some(session.id.as_str())
                && schedule_utils::intervals_overlap(
                    proposal.start_time,
                    proposal.end_time,
                    session.start_time,
                    session.end_time,
                )
        });

        if let Some(first) = colliding.next() {
            let others = colliding.count();
            conflicts.push(Conflict {
                conflict_type: ConflictType::SessionOverlap,
                message: self.overlap_message(first, others),
                severity: ConflictSeverity::High,
                related_session_id: Some(first.id.clone()),
            });
        }

        conflicts
    }

    fn overlap_message(&self, session: &ExistingSession, others: usize) -> String {
        let slot = schedule_utils::local_slot(session.start_time, session.end_time, self.timezone);
        let mut message = format!(
            "Overlaps existing session {} on {} {}-{}",
            session.id,
            slot.date.format("%a %Y-%m-%d"),
            slot.start.format("%H:%M"),
            slot.end.format("%H:%M")
        );
        if others > 0 {
            message.push_str(&format!(
                " and {} other session{}",
                others,
                if others == 1 { "" } else { "s" }
            ));
        }
        message
    }
}

pub fn validate_request(
    proposal: &ProposedSession,
    therapist: &Therapist,
    client: &Client,
) -> AppResult<()> {
    schedule_utils::ensure_interval(proposal.start_time, proposal.end_time)?;

    if proposal.therapist_id.trim().is_empty() {
        return Err(AppError::validation("therapist id is required"));
    }
    if proposal.client_id.trim().is_empty() {
        return Err(AppError::validation("client id is required"));
    }
    if therapist.id != proposal.therapist_id {
        return Err(AppError::validation_with_details(
            "therapist record does not match the requested therapist id",
            json!({"requested": proposal.therapist_id, "record": therapist.id}),
        ));
    }
    if client.id != proposal.client_id {
        return Err(AppError::validation_with_details(
            "client record does not match the requested client id",
            json!({"requested": proposal.client_id, "record": client.id}),
        ));
    }
    Ok(())
}

fn fits(window: &WeeklyAvailability, slot: &LocalSlot) -> bool {
    slot.same_day && is_within_availability(window, slot.weekday, slot.start, slot.end)
}

fn unavailable_message(role: &str, name: &str, slot: &LocalSlot) -> String {
    format!(
        "{} {} is not available on {} from {} to {}",
        role,
        name,
        slot.date.format("%A"),
        slot.start.format("%H:%M"),
        slot.end.format("%H:%M")
    )
}
